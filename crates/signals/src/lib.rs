//! Indicator-based signal engine for tick streams.

pub mod engine;
pub mod indicators;

pub use engine::{classify, IndicatorConfig, IndicatorEngine, IndicatorValues};
pub use indicators::Trend;
