//! Operator notifications rendered to the terminal.

use deriv_bot_core::{OperatorNotifier, SessionSummary, TradeClosed, TradeOpened};
use tracing::{error, info};

fn progress_of(trade_number: u32, target_trades: u32) -> String {
    if target_trades == 0 {
        format!("#{trade_number}")
    } else {
        format!("{trade_number}/{target_trades}")
    }
}

#[must_use]
pub fn format_opened(trade: &TradeOpened) -> String {
    format!(
        "▶ Trade {} opened: {} @ {} stake {:.2}",
        progress_of(trade.trade_number, trade.target_trades),
        trade.contract_type,
        trade.entry_price,
        trade.stake
    )
}

#[must_use]
pub fn format_closed(trade: &TradeClosed) -> String {
    let outcome = if trade.is_win { "WIN " } else { "LOSS" };
    format!(
        "{} Trade {} {outcome} {:+.2} | balance {:.2} | next stake {:.2}",
        if trade.is_win { "✓" } else { "✗" },
        progress_of(trade.trade_number, trade.target_trades),
        trade.profit,
        trade.balance,
        trade.next_stake
    )
}

/// Prints every notification to stdout and mirrors it into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl OperatorNotifier for ConsoleNotifier {
    fn on_trade_opened(&self, trade: &TradeOpened) {
        info!(trade_number = trade.trade_number, "Trade opened");
        println!("{}", format_opened(trade));
    }

    fn on_trade_closed(&self, trade: &TradeClosed) {
        info!(trade_number = trade.trade_number, is_win = trade.is_win, "Trade closed");
        println!("{}", format_closed(trade));
    }

    fn on_session_complete(&self, summary: &SessionSummary) {
        info!(trades = summary.total_trades, "Session complete");
        println!();
        println!("{summary}");
    }

    fn on_error(&self, message: &str) {
        error!(%message, "Operator alert");
        println!("⚠ {message}");
    }

    fn on_progress(&self, message: &str) {
        info!(%message, "Progress");
        println!("… {message}");
    }
}
