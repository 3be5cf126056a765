//! Error types for the level engine

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::{CandleValidationError, Symbol};

/// Pipeline stage at which an instrument failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Validate,
    Atr,
    Pivot,
    Quantize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Validate => "validate",
            Stage::Atr => "atr",
            Stage::Pivot => "pivot",
            Stage::Quantize => "quantize",
        };
        f.write_str(name)
    }
}

/// Errors raised while building or persisting the parameter record.
///
/// An unwritable destination surfaces as [`LevelsError::Io`];
/// [`LevelsError::Serialization`] is reserved for record content that cannot
/// be encoded or parsed.
#[derive(Debug, Error)]
pub enum LevelsError {
    #[error("insufficient data: need at least {needed} bars, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("invalid bar at {datetime}")]
    InvalidBar {
        datetime: DateTime<Utc>,
        #[source]
        source: CandleValidationError,
    },

    #[error("cannot quantize non-finite value {0}")]
    InvalidValue(f64),

    #[error("no quantization rule for instrument {0}")]
    UnknownInstrument(Symbol),

    #[error("no parameter record found at {0}")]
    NotFound(String),

    #[error("malformed parameter record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("no bars returned for {0}")]
    EmptyResult(String),

    #[error("unreadable bar data from {origin}: {reason}")]
    DataFormat { origin: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{symbol} failed at {stage} stage")]
    Instrument {
        symbol: Symbol,
        stage: Stage,
        #[source]
        source: Box<LevelsError>,
    },
}

impl LevelsError {
    /// Attach the instrument and stage to an error
    pub fn at(self, symbol: &Symbol, stage: Stage) -> Self {
        LevelsError::Instrument {
            symbol: symbol.clone(),
            stage,
            source: Box::new(self),
        }
    }

    /// The underlying error with instrument/stage wrappers removed
    pub fn root_cause(&self) -> &LevelsError {
        match self {
            LevelsError::Instrument { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LevelsError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for LevelsError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type LevelsResult<T> = Result<T, LevelsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_wrapper_names_symbol_and_stage() {
        let err = LevelsError::InsufficientData { needed: 15, got: 14 }
            .at(&Symbol::new("BTCUSD"), Stage::Atr);
        let msg = err.to_string();
        assert!(msg.contains("BTCUSD"));
        assert!(msg.contains("atr"));
        assert!(matches!(
            err.root_cause(),
            LevelsError::InsufficientData { needed: 15, got: 14 }
        ));
    }
}
