//! Integration tests for the daily-levels pipeline
//!
//! These tests run both modes end to end against a scratch parameter file.

use approx::assert_abs_diff_eq;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::Cell;
use std::collections::HashMap;
use std::fs;
use std::io::Write;

use daily_levels::data::{CsvSeriesProvider, SeriesProvider};
use daily_levels::indicators::average_true_range;
use daily_levels::params::{self, Mode};
use daily_levels::quantize::Level;
use daily_levels::store::render;
use daily_levels::{
    Candle, Config, InstrumentProfile, JsonFileStore, LevelsError, LevelsResult, ParameterStore,
    Stage, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

/// Generate mock daily candles oscillating around `base_price`
fn generate_mock_candles(count: usize, base_price: f64, volatility: f64) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap();
    let mut price = base_price;

    (0..count)
        .map(|i| {
            let change = match i % 3 {
                0 => volatility,
                1 => -volatility * 0.5,
                _ => volatility * 0.3,
            };
            price += change;
            Candle {
                datetime: start + Duration::days(i as i64),
                open: price - change * 0.3,
                high: price + volatility * 0.5,
                low: price - volatility * 0.5,
                close: price,
                volume: 1000.0 + i as f64 * 10.0,
            }
        })
        .collect()
}

/// In-memory provider keyed by symbol
struct StaticProvider {
    bars: HashMap<String, Vec<Candle>>,
    calls: Cell<usize>,
}

impl StaticProvider {
    fn new() -> Self {
        Self {
            bars: HashMap::new(),
            calls: Cell::new(0),
        }
    }

    fn with(mut self, symbol: &str, bars: Vec<Candle>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }
}

impl SeriesProvider for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch_daily_bars(
        &self,
        profile: &InstrumentProfile,
        _lookback_days: u32,
    ) -> LevelsResult<Vec<Candle>> {
        self.calls.set(self.calls.get() + 1);
        self.bars
            .get(profile.symbol.as_str())
            .cloned()
            .ok_or_else(|| LevelsError::Network(format!("{} unreachable", profile.ticker)))
    }
}

fn default_provider() -> StaticProvider {
    StaticProvider::new()
        .with("XAUUSD", generate_mock_candles(60, 2650.0, 18.0))
        .with("BTCUSD", generate_mock_candles(60, 95_000.0, 1_800.0))
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, day, hour, 0, 0).unwrap()
}

fn scratch() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        output: dir.path().join("parameters.json"),
        ..Config::default()
    };
    (dir, config)
}

const BLOCK_KEYS: [&str; 8] = [
    "Support",
    "Resistance",
    "BreakUp",
    "BreakDown",
    "SL",
    "TP",
    "Trail",
    "RetestRange",
];

// =============================================================================
// Recompute
// =============================================================================

#[test]
fn test_recompute_writes_full_record() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider = default_provider();

    let outcome = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    assert!(outcome.written);
    assert_eq!(outcome.record.timestamp, "2025-11-05T09:00:00+09:00");

    let text = fs::read_to_string(&config.output).unwrap();
    assert!(text.ends_with("}\n"));

    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 3);
    for symbol in ["XAUUSD", "BTCUSD"] {
        let block = object[symbol].as_object().unwrap();
        assert_eq!(block.len(), 8, "{symbol} block");
        for key in BLOCK_KEYS {
            assert!(block[key].is_number(), "{symbol}.{key}");
        }
    }

    // BTC publishes whole numbers, XAU two-decimal floats
    assert!(object["BTCUSD"]["SL"].is_i64());
    assert!(object["XAUUSD"]["SL"].is_f64());
    assert_eq!(object["BTCUSD"]["RetestRange"], serde_json::json!(90));
    assert_eq!(object["XAUUSD"]["RetestRange"], serde_json::json!(3.0));

    // Instruments follow the configured order
    assert!(text.find("\"XAUUSD\"").unwrap() < text.find("\"BTCUSD\"").unwrap());
}

#[test]
fn test_recompute_levels_match_indicators() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider = default_provider();

    let outcome = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();

    let bars = &provider.bars["XAUUSD"];
    let prior = &bars[bars.len() - 2];
    let pivot = (prior.high + prior.low + prior.close) / 3.0;
    let atr = average_true_range(bars, 14).unwrap().value;

    let xau = outcome.record.block(&Symbol::new("XAUUSD")).unwrap();
    assert_abs_diff_eq!(xau.break_up.as_f64(), prior.high, epsilon = 0.006);
    assert_abs_diff_eq!(xau.break_down.as_f64(), prior.low, epsilon = 0.006);
    assert_abs_diff_eq!(xau.resistance.as_f64(), 2.0 * pivot - prior.low, epsilon = 0.006);
    assert_abs_diff_eq!(xau.support.as_f64(), 2.0 * pivot - prior.high, epsilon = 0.006);
    assert_abs_diff_eq!(xau.sl.as_f64(), atr * 0.9, epsilon = 0.006);
    assert_abs_diff_eq!(xau.tp.as_f64(), atr * 1.1, epsilon = 0.006);
    assert_abs_diff_eq!(xau.trail.as_f64(), atr * 0.7, epsilon = 0.006);
    assert_eq!(xau.retest_range, Level::Float(3.0));
}

#[test]
fn test_recompute_twice_writes_once() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider = default_provider();

    let first = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    let second = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    assert!(first.written);
    assert!(!second.written);
}

#[test]
fn test_new_timestamp_only_changes_timestamp_line() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider = default_provider();

    params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    let before = fs::read_to_string(&config.output).unwrap();

    let outcome = params::run(Mode::Recompute(&provider), &config, &store, at(6, 0)).unwrap();
    assert!(outcome.written);
    let after = fs::read_to_string(&config.output).unwrap();

    let changed: Vec<(&str, &str)> = before
        .lines()
        .zip(after.lines())
        .filter(|(a, b)| a != b)
        .collect();
    assert_eq!(before.lines().count(), after.lines().count());
    assert_eq!(changed.len(), 1);
    assert!(changed[0].1.contains("\"timestamp\": \"2025-11-06T09:00:00+09:00\""));
}

#[test]
fn test_insufficient_data_leaves_file_untouched() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    params::run(Mode::Recompute(&default_provider()), &config, &store, at(5, 0)).unwrap();
    let before = fs::read(&config.output).unwrap();

    // exactly N bars, one short
    let short = StaticProvider::new()
        .with("XAUUSD", generate_mock_candles(60, 2650.0, 18.0))
        .with("BTCUSD", generate_mock_candles(14, 95_000.0, 1_800.0));

    let err = params::run(Mode::Recompute(&short), &config, &store, at(6, 0)).unwrap_err();
    match &err {
        LevelsError::Instrument { symbol, stage, .. } => {
            assert_eq!(symbol.as_str(), "BTCUSD");
            assert_eq!(*stage, Stage::Atr);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(
        err.root_cause(),
        LevelsError::InsufficientData { needed: 15, got: 14 }
    ));
    assert_eq!(fs::read(&config.output).unwrap(), before);
}

#[test]
fn test_fetch_failure_aborts_before_write() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider =
        StaticProvider::new().with("XAUUSD", generate_mock_candles(60, 2650.0, 18.0));

    let err = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap_err();
    assert!(matches!(
        err,
        LevelsError::Instrument {
            stage: Stage::Fetch,
            ..
        }
    ));
    assert!(matches!(err.root_cause(), LevelsError::Network(_)));
    assert!(!config.output.exists());
}

#[test]
fn test_invalid_prior_bar_is_rejected() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);

    let mut xau = generate_mock_candles(60, 2650.0, 18.0);
    let prior = xau.len() - 2;
    xau[prior].high = xau[prior].low - 1.0;
    let provider = default_provider().with("XAUUSD", xau);

    let err = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap_err();
    assert!(matches!(err.root_cause(), LevelsError::InvalidBar { .. }));
    assert!(err.to_string().contains("XAUUSD"));
    assert!(!config.output.exists());
}

#[test]
fn test_recompute_from_csv_files() {
    let (dir, mut config) = scratch();
    let data_dir = dir.path().join("data");
    fs::create_dir_all(&data_dir).unwrap();

    for (symbol, base, vol) in [("XAUUSD", 2650.0, 18.0), ("BTCUSD", 95_000.0, 1_800.0)] {
        let mut file = fs::File::create(data_dir.join(format!("{}_1d.csv", symbol))).unwrap();
        writeln!(file, "datetime,open,high,low,close,volume").unwrap();
        for c in generate_mock_candles(30, base, vol) {
            writeln!(
                file,
                "{},{},{},{},{},{}",
                c.datetime.format("%Y-%m-%d %H:%M:%S"),
                c.open,
                c.high,
                c.low,
                c.close,
                c.volume
            )
            .unwrap();
        }
    }
    config.data_dir = data_dir.clone();

    let provider = CsvSeriesProvider::new(&data_dir);
    let store = JsonFileStore::new(&config.output);
    let outcome = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    assert!(outcome.written);
    assert_eq!(
        outcome.record.symbols().map(|s| s.as_str()).collect::<Vec<_>>(),
        vec!["XAUUSD", "BTCUSD"]
    );
}

// =============================================================================
// Refresh
// =============================================================================

#[test]
fn test_refresh_without_record_is_not_found() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);

    let err = params::run(Mode::Refresh, &config, &store, at(5, 0)).unwrap_err();
    assert!(matches!(err, LevelsError::NotFound(_)));
    assert!(!config.output.exists());
}

#[test]
fn test_refresh_changes_only_timestamp() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    let provider = default_provider();

    let computed = params::run(Mode::Recompute(&provider), &config, &store, at(5, 0)).unwrap();
    let refreshed = params::run(Mode::Refresh, &config, &store, at(5, 12)).unwrap();

    assert!(refreshed.written);
    assert_eq!(refreshed.record.timestamp, "2025-11-05T21:00:00+09:00");
    assert_eq!(refreshed.record.entries, computed.record.entries);
    assert_eq!(provider.calls.get(), 2);

    let on_disk = store.load().unwrap().unwrap();
    assert_eq!(on_disk, refreshed.record);
}

#[test]
fn test_refresh_keeps_existing_layout() {
    let (_dir, config) = scratch();
    // Hand-written record in a different instrument order, with the legacy
    // integer/float mix
    let existing = r#"{
  "timestamp": "2025-11-04T09:00:00+0900",
  "BTCUSD": {
    "Support": 101200,
    "Resistance": 104900,
    "BreakUp": 104500,
    "BreakDown": 101000,
    "SL": 2200,
    "TP": 2750,
    "Trail": 1650,
    "RetestRange": 90
  },
  "XAUUSD": {
    "Support": 3960.12,
    "Resistance": 4010.5,
    "BreakUp": 4005.0,
    "BreakDown": 3950.25,
    "SL": 42.3,
    "TP": 51.7,
    "Trail": 32.9,
    "RetestRange": 3.0
  }
}
"#;
    fs::write(&config.output, existing).unwrap();
    let store = JsonFileStore::new(&config.output);

    let outcome = params::run(Mode::Refresh, &config, &store, at(5, 0)).unwrap();
    assert!(outcome.written);

    let expected = existing.replace("2025-11-04T09:00:00+0900", "2025-11-05T09:00:00+09:00");
    assert_eq!(fs::read_to_string(&config.output).unwrap(), expected);
    assert_eq!(render(&outcome.record).unwrap(), expected);
}

#[test]
fn test_refresh_keeps_fields_it_does_not_produce() {
    let (_dir, config) = scratch();
    // Extra block field from the EA side plus a top-level schema marker
    let existing = r#"{
  "timestamp": "2025-11-04T09:00:00+09:00",
  "version": 2,
  "XAUUSD": {
    "Support": 3960.12,
    "Resistance": 4010.5,
    "BreakUp": 4005.0,
    "BreakDown": 3950.25,
    "SL": 42.3,
    "TP": 51.7,
    "Trail": 32.9,
    "RetestRange": 3.0,
    "MaxSpread": 6.0,
    "Comment": "manual"
  },
  "BTCUSD": {
    "Support": 101200,
    "Resistance": 104900,
    "BreakUp": 104500,
    "BreakDown": 101000,
    "SL": 2200,
    "TP": 2750,
    "Trail": 1650,
    "RetestRange": 90
  }
}
"#;
    fs::write(&config.output, existing).unwrap();
    let store = JsonFileStore::new(&config.output);

    let outcome = params::run(Mode::Refresh, &config, &store, at(5, 0)).unwrap();
    assert!(outcome.written);

    let expected = existing.replace("2025-11-04T09:00:00+09:00", "2025-11-05T09:00:00+09:00");
    assert_eq!(fs::read_to_string(&config.output).unwrap(), expected);

    // a second refresh in the same second leaves the file alone
    let again = params::run(Mode::Refresh, &config, &store, at(5, 0)).unwrap();
    assert!(!again.written);
}

#[test]
fn test_refresh_same_second_is_noop() {
    let (_dir, config) = scratch();
    let store = JsonFileStore::new(&config.output);
    params::run(Mode::Recompute(&default_provider()), &config, &store, at(5, 0)).unwrap();

    let outcome = params::run(Mode::Refresh, &config, &store, at(5, 0)).unwrap();
    assert!(!outcome.written);
}
