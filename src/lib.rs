//! Daily Levels
//!
//! Computes the daily reference levels an EA trades XAUUSD and BTCUSD
//! against (pivot support/resistance, prior-session breakout bands and
//! ATR-sized stop, target and trailing distances) and publishes them as a
//! single JSON parameter record.

pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod params;
pub mod quantize;
pub mod store;
pub mod types;

pub use config::{Config, InstrumentProfile};
pub use error::{LevelsError, LevelsResult, Stage};
pub use params::{Mode, ParameterBlock, ParameterRecord, RecordEntry, RunOutcome};
pub use store::{JsonFileStore, ParameterStore};
pub use types::*;
