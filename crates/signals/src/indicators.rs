//! Technical indicators over a tick price series.
//!
//! Ticks carry a single quote, so callers approximate each tick's high and
//! low from the move against the previous quote.

use std::fmt;

/// Arithmetic mean, 0 for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Running EMA seeded with the SMA of the first `period` prices.
///
/// The first element corresponds to `prices[period - 1]`; empty when there
/// are fewer than `period` prices.
#[must_use]
pub fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = mean(&prices[..period]);
    let mut series = Vec::with_capacity(prices.len() - period + 1);
    series.push(ema);
    for price in &prices[period..] {
        ema = price * k + ema * (1.0 - k);
        series.push(ema);
    }
    series
}

/// Latest EMA value. Falls back to the plain mean with fewer than `period` prices.
#[must_use]
pub fn ema(prices: &[f64], period: usize) -> f64 {
    ema_series(prices, period)
        .last()
        .copied()
        .unwrap_or_else(|| mean(prices))
}

/// RSI from simple averages of the last `period` changes.
///
/// Neutral 50 without enough history; 100 when there were no losses.
#[must_use]
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }
    let recent = &prices[prices.len() - period - 1..];
    let (gains, losses) = recent
        .windows(2)
        .map(|w| w[1] - w[0])
        .fold((0.0, 0.0), |(g, l), change| {
            if change > 0.0 {
                (g + change, l)
            } else {
                (g, l - change)
            }
        });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD line, signal line and histogram. `None` until `slow + signal` prices exist.
#[must_use]
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || fast > slow || prices.len() < slow + signal {
        return None;
    }
    let fast_series = ema_series(prices, fast);
    let slow_series = ema_series(prices, slow);
    let offset = slow - fast;

    let values: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, slow_ema)| fast_series[i + offset] - slow_ema)
        .collect();

    let line = *values.last()?;
    let signal_line = ema(&values, signal);
    Some(Macd {
        line,
        signal: signal_line,
        histogram: line - signal_line,
    })
}

/// Stochastic %K and %D. Neutral 50/50 without `period` prices.
#[must_use]
pub fn stochastic(
    closes: &[f64],
    highs: &[f64],
    lows: &[f64],
    period: usize,
    smooth: usize,
) -> (f64, f64) {
    if period == 0 || closes.len() < period || highs.len() != closes.len() || lows.len() != closes.len() {
        return (50.0, 50.0);
    }

    let k_values: Vec<f64> = (period..=closes.len())
        .map(|end| {
            let start = end - period;
            let highest = highs[start..end].iter().copied().fold(f64::MIN, f64::max);
            let lowest = lows[start..end].iter().copied().fold(f64::MAX, f64::min);
            if highest == lowest {
                50.0
            } else {
                (closes[end - 1] - lowest) / (highest - lowest) * 100.0
            }
        })
        .collect();

    let k = k_values.last().copied().unwrap_or(50.0);
    let tail = &k_values[k_values.len().saturating_sub(smooth.max(1))..];
    (k, mean(tail))
}

/// Average true range over the last `period` ticks.
///
/// With too little history returns the full high-low span seen so far.
#[must_use]
pub fn atr(closes: &[f64], highs: &[f64], lows: &[f64], period: usize) -> f64 {
    if highs.len() != closes.len() || lows.len() != closes.len() || closes.is_empty() {
        return 0.0;
    }
    if period == 0 || closes.len() < period + 1 {
        let highest = highs.iter().copied().fold(f64::MIN, f64::max);
        let lowest = lows.iter().copied().fold(f64::MAX, f64::min);
        return highest - lowest;
    }

    let true_ranges: Vec<f64> = (1..closes.len())
        .map(|i| {
            let prev_close = closes[i - 1];
            (highs[i] - lows[i])
                .max((highs[i] - prev_close).abs())
                .max((lows[i] - prev_close).abs())
        })
        .collect();
    mean(&true_ranges[true_ranges.len() - period..])
}

/// Direction of the last few ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trend {
    Up,
    Down,
    #[default]
    Sideways,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Sideways => "SIDEWAYS",
        })
    }
}

/// `Up` or `Down` when each of the last `ticks` moves went that way.
#[must_use]
pub fn tick_trend(prices: &[f64], ticks: usize) -> Trend {
    if ticks == 0 || prices.len() < ticks + 1 {
        return Trend::Sideways;
    }
    let recent = &prices[prices.len() - ticks - 1..];
    let ups = recent.windows(2).filter(|w| w[1] > w[0]).count();
    let downs = recent.windows(2).filter(|w| w[1] < w[0]).count();
    if ups >= ticks {
        Trend::Up
    } else if downs >= ticks {
        Trend::Down
    } else {
        Trend::Sideways
    }
}
