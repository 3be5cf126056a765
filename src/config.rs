//! Configuration management
//!
//! Handles loading and validating the JSON configuration file. Everything is
//! optional: a missing file or missing keys fall back to the production
//! tuning for XAUUSD and BTCUSD.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LevelsError, LevelsResult};
use crate::indicators::ATR_PERIOD;
use crate::quantize::Precision;
use crate::Symbol;

/// Environment variable overriding the record path
pub const OUTPUT_ENV: &str = "DAILY_LEVELS_OUTPUT";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the parameter record lives
    pub output: PathBuf,
    /// ATR window in sessions
    pub atr_period: usize,
    /// Calendar days of history requested from the data source
    pub lookback_days: u32,
    /// Directory of `<SYMBOL>_1d.csv` files for the offline source
    pub data_dir: PathBuf,
    /// Instruments in the order they appear in the record
    pub instruments: Vec<InstrumentProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            output: PathBuf::from("parameters.json"),
            atr_period: ATR_PERIOD,
            lookback_days: 90,
            data_dir: PathBuf::from("data"),
            instruments: vec![InstrumentProfile::xauusd(), InstrumentProfile::btcusd()],
        }
    }
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> LevelsResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| LevelsError::io(path, e))?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| LevelsError::Config(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (the record path may differ per deployment)
    pub fn apply_env(&mut self) {
        if let Ok(output) = std::env::var(OUTPUT_ENV) {
            if !output.trim().is_empty() {
                self.output = PathBuf::from(output);
            }
        }
    }

    pub fn validate(&self) -> LevelsResult<()> {
        if self.atr_period == 0 {
            return Err(LevelsError::Config("atr_period must be at least 1".into()));
        }
        if self.instruments.is_empty() {
            return Err(LevelsError::Config("at least one instrument is required".into()));
        }

        let mut seen = HashSet::new();
        for profile in &self.instruments {
            if profile.symbol.as_str() == "timestamp" {
                return Err(LevelsError::Config(
                    "\"timestamp\" is reserved and cannot be an instrument symbol".into(),
                ));
            }
            if !seen.insert(profile.symbol.clone()) {
                return Err(LevelsError::Config(format!(
                    "duplicate instrument {}",
                    profile.symbol
                )));
            }
            profile.validate()?;
        }

        Ok(())
    }

    pub fn instrument(&self, symbol: &Symbol) -> Option<&InstrumentProfile> {
        self.instruments.iter().find(|p| &p.symbol == symbol)
    }
}

/// Static tuning for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub symbol: Symbol,
    /// Ticker understood by the market-data source
    pub ticker: String,
    /// Decimal places kept in the record; 0 publishes whole numbers
    #[serde(rename = "decimals")]
    pub precision: Precision,
    pub sl_atr_mult: f64,
    pub tp_atr_mult: f64,
    pub trail_atr_mult: f64,
    /// Fixed retest tolerance in price units
    pub retest_range: f64,
}

impl InstrumentProfile {
    pub fn xauusd() -> Self {
        InstrumentProfile {
            symbol: Symbol::new("XAUUSD"),
            ticker: "XAUUSD=X".to_string(),
            precision: Precision(2),
            sl_atr_mult: 0.9,
            tp_atr_mult: 1.1,
            trail_atr_mult: 0.7,
            retest_range: 3.0,
        }
    }

    pub fn btcusd() -> Self {
        InstrumentProfile {
            symbol: Symbol::new("BTCUSD"),
            ticker: "BTC-USD".to_string(),
            precision: Precision::WHOLE,
            sl_atr_mult: 0.8,
            tp_atr_mult: 1.0,
            trail_atr_mult: 0.6,
            retest_range: 90.0,
        }
    }

    fn validate(&self) -> LevelsResult<()> {
        if self.symbol.as_str().trim().is_empty() {
            return Err(LevelsError::Config("instrument symbol is empty".into()));
        }
        if self.ticker.trim().is_empty() {
            return Err(LevelsError::Config(format!("{}: ticker is empty", self.symbol)));
        }
        // rust_decimal cannot hold more than 28 fractional digits
        if self.precision.0 > 28 {
            return Err(LevelsError::Config(format!(
                "{}: decimals must be at most 28",
                self.symbol
            )));
        }

        for (name, value) in [
            ("sl_atr_mult", self.sl_atr_mult),
            ("tp_atr_mult", self.tp_atr_mult),
            ("trail_atr_mult", self.trail_atr_mult),
            ("retest_range", self.retest_range),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(LevelsError::Config(format!(
                    "{}: {} must be a non-negative number, got {}",
                    self.symbol, name, value
                )));
            }
        }

        Ok(())
    }
}
