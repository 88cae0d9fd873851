//! Append-only trade journal on disk.
//!
//! Settled trades go to `trades.csv` in the journal directory, one row per
//! contract, header written once. Each session summary is written as pretty
//! JSON to `summary_<UTC timestamp>.json` next to it.

use crate::error::JournalError;
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use deriv_bot_core::{JournalConfig, NullJournal, SessionSummary, TradeJournal, TradeResult};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TRADES_FILE: &str = "trades.csv";

#[derive(Debug, Clone)]
pub struct CsvTradeJournal {
    directory: PathBuf,
    trades_path: PathBuf,
}

impl CsvTradeJournal {
    /// Opens (and creates if needed) a journal directory.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|e| JournalError::io(&directory, e))?;
        let trades_path = directory.join(TRADES_FILE);
        info!(path = %trades_path.display(), "Trade journal opened");
        Ok(Self {
            directory,
            trades_path,
        })
    }

    #[must_use]
    pub fn trades_path(&self) -> &Path {
        &self.trades_path
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Appends one row.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or the row cannot be written.
    pub fn append(&self, trade: &TradeResult) -> Result<(), JournalError> {
        let needs_header = fs::metadata(&self.trades_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trades_path)
            .map_err(|e| JournalError::io(&self.trades_path, e))?;

        let mut writer = WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        writer.serialize(trade)?;
        writer
            .flush()
            .map_err(|e| JournalError::io(&self.trades_path, e))?;

        debug!(trade_number = trade.trade_number, contract_id = trade.contract_id, "Trade journaled");
        Ok(())
    }

    /// Writes the summary and returns the file it went to.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub fn write_summary(&self, summary: &SessionSummary) -> Result<PathBuf, JournalError> {
        let name = format!("summary_{}.json", Utc::now().format("%Y%m%d_%H%M%S_%3f"));
        let path = self.directory.join(name);
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(&path, json).map_err(|e| JournalError::io(&path, e))?;
        info!(path = %path.display(), "Session summary written");
        Ok(path)
    }

    /// Reads back every journaled trade, oldest first.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be parsed.
    pub fn read_trades(&self) -> Result<Vec<TradeResult>, JournalError> {
        if !self.trades_path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.trades_path)?;
        let trades = reader
            .deserialize()
            .collect::<Result<Vec<TradeResult>, csv::Error>>()?;
        Ok(trades)
    }
}

impl TradeJournal for CsvTradeJournal {
    fn record_trade(&mut self, trade: &TradeResult) -> anyhow::Result<()> {
        self.append(trade)?;
        Ok(())
    }

    fn record_summary(&mut self, summary: &SessionSummary) -> anyhow::Result<()> {
        self.write_summary(summary)?;
        Ok(())
    }
}

/// Journal selected by configuration: CSV when enabled, otherwise a no-op.
///
/// # Errors
/// Returns error if the configured directory cannot be created.
pub fn open_journal(config: &JournalConfig) -> Result<Box<dyn TradeJournal>, JournalError> {
    if !config.enabled {
        return Ok(Box::new(NullJournal));
    }
    Ok(Box::new(CsvTradeJournal::open(&config.directory)?))
}
