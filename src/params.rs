//! Parameter record and the two ways of producing it
//!
//! `recompute` rebuilds every block from fresh bars. `refresh` only moves
//! the timestamp forward so the EA's freshness check passes on days when
//! market data is unavailable; it never touches a level.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info};

use crate::config::{Config, InstrumentProfile};
use crate::data::{validate_series, SeriesProvider};
use crate::error::{LevelsError, LevelsResult, Stage};
use crate::indicators::{average_true_range, pivot_levels, prior_session};
use crate::quantize::{Level, QuantizationTable};
use crate::store::ParameterStore;
use crate::{Candle, Symbol};

/// Offset of the published timestamp (JST)
pub const TIMESTAMP_OFFSET_SECS: i32 = 9 * 3600;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%:z";
const TIMESTAMP_KEY: &str = "timestamp";

/// Levels published for one instrument
///
/// Fields written by other tools are kept in `extra` and emitted after the
/// eight levels, so a refresh never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterBlock {
    pub support: Level,
    pub resistance: Level,
    pub break_up: Level,
    pub break_down: Level,
    #[serde(rename = "SL")]
    pub sl: Level,
    #[serde(rename = "TP")]
    pub tp: Level,
    pub trail: Level,
    pub retest_range: Level,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One top-level entry of the record after the timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum RecordEntry {
    Instrument(Symbol, ParameterBlock),
    /// Anything that is not a level block, carried through as-is
    Other(String, Value),
}

impl RecordEntry {
    pub fn key(&self) -> &str {
        match self {
            RecordEntry::Instrument(symbol, _) => symbol.as_str(),
            RecordEntry::Other(key, _) => key,
        }
    }
}

/// The persisted snapshot: a timestamp plus one block per instrument.
///
/// Entries keep their insertion order when written, so the file layout
/// follows the configuration (or the existing file on a refresh). Top-level
/// values that are not level blocks survive a load/save unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRecord {
    pub timestamp: String,
    pub entries: Vec<RecordEntry>,
}

impl ParameterRecord {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            entries: Vec::new(),
        }
    }

    pub fn push_block(&mut self, symbol: Symbol, block: ParameterBlock) {
        self.entries.push(RecordEntry::Instrument(symbol, block));
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&Symbol, &ParameterBlock)> {
        self.entries.iter().filter_map(|entry| match entry {
            RecordEntry::Instrument(symbol, block) => Some((symbol, block)),
            RecordEntry::Other(..) => None,
        })
    }

    pub fn block(&self, symbol: &Symbol) -> Option<&ParameterBlock> {
        self.blocks().find(|(s, _)| *s == symbol).map(|(_, block)| block)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.blocks().map(|(s, _)| s)
    }
}

impl Serialize for ParameterRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1 + self.entries.len()))?;
        map.serialize_entry(TIMESTAMP_KEY, &self.timestamp)?;
        for entry in &self.entries {
            match entry {
                RecordEntry::Instrument(symbol, block) => map.serialize_entry(symbol, block)?,
                RecordEntry::Other(key, value) => map.serialize_entry(key, value)?,
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ParameterRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = ParameterRecord;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a parameter record object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut timestamp: Option<String> = None;
                let mut entries: Vec<RecordEntry> = Vec::new();
                let mut seen = HashSet::new();

                while let Some(key) = map.next_key::<String>()? {
                    if key == TIMESTAMP_KEY {
                        if timestamp.is_some() {
                            return Err(de::Error::duplicate_field(TIMESTAMP_KEY));
                        }
                        timestamp = Some(map.next_value()?);
                    } else {
                        if !seen.insert(key.clone()) {
                            return Err(de::Error::custom(format!(
                                "duplicate key `{}`",
                                key
                            )));
                        }
                        let value: Value = map.next_value()?;
                        let entry = match ParameterBlock::deserialize(&value) {
                            Ok(block) => RecordEntry::Instrument(Symbol::new(key), block),
                            Err(_) => RecordEntry::Other(key, value),
                        };
                        entries.push(entry);
                    }
                }

                let timestamp = timestamp.ok_or_else(|| de::Error::missing_field(TIMESTAMP_KEY))?;
                Ok(ParameterRecord { timestamp, entries })
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Fixed +09:00 offset used for every published timestamp
pub fn timestamp_offset() -> FixedOffset {
    FixedOffset::east_opt(TIMESTAMP_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// ISO-8601 at second resolution, e.g. `2025-11-05T09:00:00+09:00`
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.with_timezone(&timestamp_offset())
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

// =============================================================================
// Block Builder
// =============================================================================

/// Compute one instrument's block from its bars.
///
/// ATR runs over the whole series; pivots and breakout bands come from the
/// second-to-last bar only.
pub fn compute_block(
    profile: &InstrumentProfile,
    candles: &[Candle],
    atr_period: usize,
    table: &QuantizationTable,
) -> LevelsResult<ParameterBlock> {
    let symbol = &profile.symbol;

    validate_series(candles).map_err(|e| e.at(symbol, Stage::Validate))?;

    let atr = average_true_range(candles, atr_period).map_err(|e| e.at(symbol, Stage::Atr))?;

    let prior = prior_session(candles).ok_or_else(|| {
        LevelsError::InsufficientData {
            needed: 2,
            got: candles.len(),
        }
        .at(symbol, Stage::Pivot)
    })?;
    let pivots = pivot_levels(prior).map_err(|e| e.at(symbol, Stage::Pivot))?;

    debug!(
        "{}: atr({})={:.6} pivot={:.6} r1={:.6} s1={:.6} high={} low={}",
        symbol,
        atr.period,
        atr.value,
        pivots.pivot,
        pivots.resistance1,
        pivots.support1,
        pivots.session_high,
        pivots.session_low
    );

    let q = |raw: f64| {
        table
            .quantize(symbol, raw)
            .map_err(|e| e.at(symbol, Stage::Quantize))
    };

    Ok(ParameterBlock {
        support: q(pivots.support1)?,
        resistance: q(pivots.resistance1)?,
        break_up: q(pivots.session_high)?,
        break_down: q(pivots.session_low)?,
        sl: q(atr.value * profile.sl_atr_mult)?,
        tp: q(atr.value * profile.tp_atr_mult)?,
        trail: q(atr.value * profile.trail_atr_mult)?,
        retest_range: q(profile.retest_range)?,
        extra: Map::new(),
    })
}

/// Full recompute from fresh bars.
///
/// Every instrument is fetched and computed before anything is returned; the
/// first failure aborts the whole record.
pub fn build_record(
    config: &Config,
    provider: &dyn SeriesProvider,
    now: DateTime<Utc>,
) -> LevelsResult<ParameterRecord> {
    let table = QuantizationTable::from_profiles(&config.instruments);
    let mut record = ParameterRecord::new(format_timestamp(now));

    for profile in &config.instruments {
        let candles = provider
            .fetch_daily_bars(profile, config.lookback_days)
            .map_err(|e| e.at(&profile.symbol, Stage::Fetch))?;

        let block = compute_block(profile, &candles, config.atr_period, &table)?;
        info!(
            "{}: support={} resistance={} break_up={} break_down={} sl={} tp={} trail={} retest={}",
            profile.symbol,
            block.support,
            block.resistance,
            block.break_up,
            block.break_down,
            block.sl,
            block.tp,
            block.trail,
            block.retest_range
        );
        record.push_block(profile.symbol.clone(), block);
    }

    Ok(record)
}

/// Timestamp-only refresh of the stored record.
pub fn refresh_timestamp(
    store: &dyn ParameterStore,
    now: DateTime<Utc>,
) -> LevelsResult<ParameterRecord> {
    let mut record = store
        .load()?
        .ok_or_else(|| LevelsError::NotFound(store.location()))?;

    record.timestamp = format_timestamp(now);
    Ok(record)
}

// =============================================================================
// Entry Point
// =============================================================================

/// How a run produces its record
pub enum Mode<'a> {
    /// Rebuild every block from the given data source
    Recompute(&'a dyn SeriesProvider),
    /// Keep the stored blocks and move the timestamp
    Refresh,
}

impl Mode<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Recompute(_) => "recompute",
            Mode::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub record: ParameterRecord,
    /// Whether the store was rewritten
    pub written: bool,
}

/// Produce a record in the requested mode and persist it if it changed.
///
/// Nothing is written unless the whole record was produced.
pub fn run(
    mode: Mode<'_>,
    config: &Config,
    store: &dyn ParameterStore,
    now: DateTime<Utc>,
) -> LevelsResult<RunOutcome> {
    info!("Starting {} run against {}", mode.name(), store.location());

    let record = match mode {
        Mode::Recompute(provider) => {
            info!("Data source: {}", provider.name());
            build_record(config, provider, now)?
        }
        Mode::Refresh => refresh_timestamp(store, now)?,
    };

    let written = store.save_if_changed(&record)?;
    if written {
        info!("{} updated (timestamp {})", store.location(), record.timestamp);
    } else {
        info!("{} unchanged", store.location());
    }

    Ok(RunOutcome { record, written })
}
