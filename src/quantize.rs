//! Per-instrument rounding of published levels
//!
//! Every value written to the parameter record goes through a
//! [`QuantizationTable`] lookup, so all eight fields of a block share one
//! precision. Rounding is half-to-even on the exact binary value of the
//! input, so values already published to the EA keep their rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::InstrumentProfile;
use crate::error::{LevelsError, LevelsResult};
use crate::types::Symbol;

/// A quantized level as it appears in the parameter file.
///
/// Integer precision serializes as a JSON integer (`96001`), fractional
/// precision as a JSON float (`2030.0`, `2668.94`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Level {
    Int(i64),
    Float(f64),
}

impl Level {
    pub fn as_f64(self) -> f64 {
        match self {
            Level::Int(v) => v as f64,
            Level::Float(v) => v,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Int(v) => write!(f, "{}", v),
            Level::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Number of decimal places kept for an instrument; zero means whole units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Precision(pub u32);

impl Precision {
    pub const WHOLE: Precision = Precision(0);

    /// Round `raw` to this precision.
    pub fn apply(self, raw: f64) -> LevelsResult<Level> {
        let exact = Decimal::from_f64_retain(raw).ok_or(LevelsError::InvalidValue(raw))?;
        let rounded = exact.round_dp_with_strategy(self.0, RoundingStrategy::MidpointNearestEven);

        if self.0 == 0 {
            return rounded
                .to_i64()
                .map(Level::Int)
                .ok_or(LevelsError::InvalidValue(raw));
        }

        // mantissa / 10^scale is a single correctly rounded division, which
        // lands on the shortest f64 for the rounded decimal.
        let scale = rounded.scale();
        let mantissa = rounded.mantissa() as f64;
        let value = if scale == 0 {
            mantissa
        } else {
            mantissa / 10f64.powi(scale as i32)
        };
        Ok(Level::Float(value))
    }
}

/// Rounding rules keyed by instrument symbol
#[derive(Debug, Clone, Default)]
pub struct QuantizationTable {
    rules: HashMap<Symbol, Precision>,
}

impl QuantizationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a InstrumentProfile>) -> Self {
        let rules = profiles
            .into_iter()
            .map(|p| (p.symbol.clone(), p.precision))
            .collect();
        QuantizationTable { rules }
    }

    pub fn insert(&mut self, symbol: Symbol, precision: Precision) {
        self.rules.insert(symbol, precision);
    }

    pub fn precision(&self, symbol: &Symbol) -> Option<Precision> {
        self.rules.get(symbol).copied()
    }

    /// Quantize a raw value using the rule registered for `symbol`.
    pub fn quantize(&self, symbol: &Symbol, raw: f64) -> LevelsResult<Level> {
        self.precision(symbol)
            .ok_or_else(|| LevelsError::UnknownInstrument(symbol.clone()))?
            .apply(raw)
    }
}
