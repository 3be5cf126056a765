//! Technical indicators
//!
//! Average true range over a simple moving average and classic floor-trader
//! pivots taken from a single completed session.

use serde::{Deserialize, Serialize};

use crate::error::{LevelsError, LevelsResult};
use crate::types::Candle;

/// Default ATR window
pub const ATR_PERIOD: usize = 14;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    for i in 0..values.len() {
        if period == 0 || i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Calculate True Range for every session that has a previous close.
///
/// The result is one shorter than the input: element `j` belongs to
/// `candles[j + 1]`.
pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let cur = &pair[1];
            let hl = cur.high - cur.low;
            let hc = (cur.high - prev_close).abs();
            let lc = (cur.low - prev_close).abs();
            hl.max(hc).max(lc)
        })
        .collect()
}

/// Rolling ATR aligned with `candles`; `None` where the window is not yet full.
///
/// The first session has no previous close and never contributes, so the
/// first defined value sits at index `period`.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    if candles.is_empty() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(candles.len());
    series.push(None);
    series.extend(sma(&true_range(candles), period));
    series
}

/// Smoothed volatility scalar used to size risk distances
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    pub value: f64,
    pub period: usize,
}

/// Most recent ATR value over `period` sessions.
///
/// Needs `period + 1` bars so that every sample has a previous close.
pub fn average_true_range(candles: &[Candle], period: usize) -> LevelsResult<VolatilityEstimate> {
    let period = period.max(1);
    let insufficient = LevelsError::InsufficientData {
        needed: period + 1,
        got: candles.len(),
    };
    if candles.len() <= period {
        return Err(insufficient);
    }

    let value = atr_series(candles, period)
        .last()
        .copied()
        .flatten()
        .ok_or(insufficient)?;

    Ok(VolatilityEstimate { value, period })
}

/// Classic pivot with its first support and resistance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotSet {
    pub pivot: f64,
    pub resistance1: f64,
    pub support1: f64,
    pub session_high: f64,
    pub session_low: f64,
}

/// Pivot levels from the last fully closed session only.
pub fn pivot_levels(prior: &Candle) -> LevelsResult<PivotSet> {
    prior.validate().map_err(|source| LevelsError::InvalidBar {
        datetime: prior.datetime,
        source,
    })?;

    let (high, low, close) = (prior.high, prior.low, prior.close);
    let pivot = (high + low + close) / 3.0;

    Ok(PivotSet {
        pivot,
        resistance1: 2.0 * pivot - low,
        support1: 2.0 * pivot - high,
        session_high: high,
        session_low: low,
    })
}

/// The most recent session that is known to be closed.
///
/// The newest bar of a fresh fetch may still be trading, so this is the
/// second-to-last element.
pub fn prior_session(candles: &[Candle]) -> Option<&Candle> {
    candles.len().checked_sub(2).and_then(|i| candles.get(i))
}
