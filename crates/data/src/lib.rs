//! Persistence for trading sessions.
//!
//! Provides the CSV trade journal used by the execution engine and the
//! configuration-driven [`open_journal`] constructor.

pub mod csv_storage;
pub mod error;

pub use csv_storage::{open_journal, CsvTradeJournal, TRADES_FILE};
pub use error::JournalError;
