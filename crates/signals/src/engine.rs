use crate::indicators::{self, Trend};
use deriv_bot_core::{Analysis, Classification, SignalEngine, SignalStats};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Periods and thresholds of the confluence engine.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub max_history: usize,
    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub stoch_period: usize,
    pub stoch_smooth: usize,
    pub stoch_oversold: f64,
    pub stoch_overbought: f64,
    pub atr_period: usize,
    pub trend_ticks: usize,
    pub min_confidence: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            max_history: 200,
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            ema_fast: 9,
            ema_slow: 21,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            stoch_period: 14,
            stoch_smooth: 3,
            stoch_oversold: 20.0,
            stoch_overbought: 80.0,
            atr_period: 14,
            trend_ticks: 3,
            min_confidence: 0.5,
        }
    }
}

impl IndicatorConfig {
    /// Ticks needed before any classification other than WAIT.
    #[must_use]
    pub fn min_ticks(&self) -> usize {
        (self.rsi_period + 1).max(self.ema_slow)
    }
}

/// Indicator readings from the latest evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorValues {
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub macd_histogram: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub atr: f64,
    pub trend: Trend,
}

impl Default for IndicatorValues {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            ema_fast: 0.0,
            ema_slow: 0.0,
            macd_histogram: 0.0,
            stoch_k: 50.0,
            stoch_d: 50.0,
            atr: 0.0,
            trend: Trend::Sideways,
        }
    }
}

/// Scores indicator readings into a classification.
///
/// BUY needs the buy score to reach the confidence floor, beat the sell
/// score and come with an oversold RSI. SELL mirrors it.
#[must_use]
pub fn classify(values: &IndicatorValues, config: &IndicatorConfig) -> Analysis {
    let mut buy = 0.0;
    let mut sell = 0.0;
    let mut buy_reasons = Vec::new();
    let mut sell_reasons = Vec::new();

    if values.rsi < config.rsi_oversold {
        buy += 0.4;
        buy_reasons.push(format!("RSI oversold ({:.1})", values.rsi));
    } else if values.rsi > config.rsi_overbought {
        sell += 0.4;
        sell_reasons.push(format!("RSI overbought ({:.1})", values.rsi));
    }

    if values.ema_fast > 0.0 && values.ema_slow > 0.0 {
        if values.ema_fast > values.ema_slow {
            buy += 0.25;
            buy_reasons.push("EMA fast above slow".to_string());
        } else if values.ema_fast < values.ema_slow {
            sell += 0.25;
            sell_reasons.push("EMA fast below slow".to_string());
        }
    }

    if values.macd_histogram > 0.0 {
        buy += 0.2;
        buy_reasons.push("MACD positive".to_string());
    } else if values.macd_histogram < 0.0 {
        sell += 0.2;
        sell_reasons.push("MACD negative".to_string());
    }

    if values.stoch_k < config.stoch_oversold {
        buy += 0.15;
        buy_reasons.push(format!("Stochastic oversold ({:.1})", values.stoch_k));
    } else if values.stoch_k > config.stoch_overbought {
        sell += 0.15;
        sell_reasons.push(format!("Stochastic overbought ({:.1})", values.stoch_k));
    }

    match values.trend {
        Trend::Up => {
            buy += 0.1;
            buy_reasons.push("Trend up".to_string());
        }
        Trend::Down => {
            sell += 0.1;
            sell_reasons.push("Trend down".to_string());
        }
        Trend::Sideways => {}
    }

    if buy >= config.min_confidence && buy > sell && values.rsi < config.rsi_oversold {
        return Analysis {
            classification: Classification::Buy,
            confidence: f64::min(buy, 1.0),
            rationale: buy_reasons.join(" | "),
        };
    }
    if sell >= config.min_confidence && sell > buy && values.rsi > config.rsi_overbought {
        return Analysis {
            classification: Classification::Sell,
            confidence: f64::min(sell, 1.0),
            rationale: sell_reasons.join(" | "),
        };
    }

    debug!(buy_score = buy, sell_score = sell, "No clear signal");
    Analysis::wait(format!(
        "RSI={:.1} | trend {} | waiting for clear signal",
        values.rsi, values.trend
    ))
}

/// RSI / EMA / MACD / Stochastic / ATR confluence over a sliding tick window.
pub struct IndicatorEngine {
    config: IndicatorConfig,
    prices: VecDeque<f64>,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    last_price: Option<Decimal>,
    last: IndicatorValues,
    total_ticks: u64,
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new(IndicatorConfig::default())
    }
}

impl IndicatorEngine {
    #[must_use]
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            prices: VecDeque::with_capacity(config.max_history + 1),
            highs: VecDeque::with_capacity(config.max_history + 1),
            lows: VecDeque::with_capacity(config.max_history + 1),
            config,
            last_price: None,
            last: IndicatorValues::default(),
            total_ticks: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Readings from the most recent `analyze` call.
    #[must_use]
    pub fn last_values(&self) -> &IndicatorValues {
        &self.last
    }

    /// Ticks seen since construction, including ones already out of the window.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    fn compute(&self) -> IndicatorValues {
        let cfg = &self.config;
        let prices: Vec<f64> = self.prices.iter().copied().collect();
        let highs: Vec<f64> = self.highs.iter().copied().collect();
        let lows: Vec<f64> = self.lows.iter().copied().collect();

        let mut values = IndicatorValues {
            rsi: indicators::rsi(&prices, cfg.rsi_period),
            trend: indicators::tick_trend(&prices, cfg.trend_ticks),
            ..IndicatorValues::default()
        };

        if prices.len() >= cfg.ema_slow {
            values.ema_fast = indicators::ema(&prices, cfg.ema_fast);
            values.ema_slow = indicators::ema(&prices, cfg.ema_slow);
        }
        if let Some(macd) = indicators::macd(&prices, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal) {
            values.macd_histogram = macd.histogram;
        }
        let (k, d) = indicators::stochastic(&prices, &highs, &lows, cfg.stoch_period, cfg.stoch_smooth);
        values.stoch_k = k;
        values.stoch_d = d;
        if prices.len() > cfg.atr_period {
            values.atr = indicators::atr(&prices, &highs, &lows, cfg.atr_period);
        }
        values
    }
}

impl SignalEngine for IndicatorEngine {
    fn add_tick(&mut self, price: Decimal) {
        let Some(value) = price.to_f64() else {
            warn!(%price, "Tick price not representable, skipped");
            return;
        };

        let (high, low) = match self.prices.back() {
            Some(&prev) => (value.max(prev), value.min(prev)),
            None => (value, value),
        };
        self.prices.push_back(value);
        self.highs.push_back(high);
        self.lows.push_back(low);
        while self.prices.len() > self.config.max_history {
            self.prices.pop_front();
            self.highs.pop_front();
            self.lows.pop_front();
        }

        self.last_price = Some(price);
        self.total_ticks += 1;
    }

    fn analyze(&mut self) -> Analysis {
        let required = self.config.min_ticks();
        if self.prices.len() < required {
            debug!(ticks = self.prices.len(), required, "Collecting data");
            return Analysis::wait(format!(
                "collecting data: {}/{} ticks",
                self.prices.len(),
                required
            ));
        }

        self.last = self.compute();
        let analysis = classify(&self.last, &self.config);
        if analysis.classification != Classification::Wait {
            debug!(
                classification = %analysis.classification,
                confidence = analysis.confidence,
                rationale = %analysis.rationale,
                "Signal"
            );
        }
        analysis
    }

    fn clear_history(&mut self) {
        self.prices.clear();
        self.highs.clear();
        self.lows.clear();
        self.last_price = None;
        self.last = IndicatorValues::default();
    }

    fn stats(&self) -> SignalStats {
        let v = &self.last;
        SignalStats {
            tick_count: self.prices.len(),
            current_price: self.last_price,
            indicators: vec![
                ("rsi", v.rsi),
                ("ema_fast", v.ema_fast),
                ("ema_slow", v.ema_slow),
                ("macd_histogram", v.macd_histogram),
                ("stoch_k", v.stoch_k),
                ("atr", v.atr),
            ],
            trend: v.trend.to_string(),
        }
    }
}
