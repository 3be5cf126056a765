//! Data loading
//!
//! Daily bars come from a [`SeriesProvider`]: the Yahoo Finance chart API for
//! scheduled runs, or CSV files on disk for offline runs and replays.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use crate::config::InstrumentProfile;
use crate::error::{LevelsError, LevelsResult};
use crate::Candle;

// =============================================================================
// Constants
// =============================================================================

const YAHOO_CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("daily-levels/", env!("CARGO_PKG_VERSION"));

/// Source of ordered daily bars, oldest first
pub trait SeriesProvider {
    fn name(&self) -> &str;

    fn fetch_daily_bars(
        &self,
        profile: &InstrumentProfile,
        lookback_days: u32,
    ) -> LevelsResult<Vec<Candle>>;
}

/// Which provider the recompute command reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DataSource {
    #[default]
    Yahoo,
    Csv,
}

impl std::str::FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "yahoo" => Ok(DataSource::Yahoo),
            "csv" => Ok(DataSource::Csv),
            _ => Err(format!("Unknown data source: {}. Use 'yahoo' or 'csv'", s)),
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Yahoo => write!(f, "yahoo"),
            DataSource::Csv => write!(f, "csv"),
        }
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file
pub fn load_csv(path: impl AsRef<Path>) -> LevelsResult<Vec<Candle>> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let bad = |reason: String| LevelsError::DataFormat {
        origin: origin.clone(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|e| match e.into_kind() {
        csv::ErrorKind::Io(source) => LevelsError::io(path, source),
        other => bad(format!("{:?}", other)),
    })?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.map_err(|e| bad(format!("row {}: {}", row, e)))?;

        let dt_str = record
            .get(0)
            .ok_or_else(|| bad(format!("row {}: missing datetime column", row)))?;
        let datetime = parse_datetime(dt_str)
            .ok_or_else(|| bad(format!("row {}: failed to parse datetime {}", row, dt_str)))?;

        let field = |idx: usize, name: &str| -> LevelsResult<f64> {
            record
                .get(idx)
                .ok_or_else(|| bad(format!("row {}: missing {} column", row, name)))?
                .trim()
                .parse()
                .map_err(|_| bad(format!("row {}: failed to parse {}", row, name)))
        };

        candles.push(Candle {
            datetime,
            open: field(1, "open")?,
            high: field(2, "high")?,
            low: field(3, "low")?,
            close: field(4, "close")?,
            volume: field(5, "volume")?,
        });
    }

    Ok(candles)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    s.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            // Try parsing without timezone and assume UTC
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|ndt| ndt.and_utc())
        })
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|ndt| ndt.and_utc())
        })
}

/// Reads `<data_dir>/<SYMBOL>_1d.csv`
pub struct CsvSeriesProvider {
    data_dir: PathBuf,
}

impl CsvSeriesProvider {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, profile: &InstrumentProfile) -> PathBuf {
        self.data_dir.join(format!("{}_1d.csv", profile.symbol.as_str()))
    }
}

impl SeriesProvider for CsvSeriesProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_daily_bars(
        &self,
        profile: &InstrumentProfile,
        lookback_days: u32,
    ) -> LevelsResult<Vec<Candle>> {
        let path = self.path_for(profile);
        let mut candles = normalize(load_csv(&path)?);

        if candles.is_empty() {
            return Err(LevelsError::EmptyResult(path.display().to_string()));
        }

        let keep = lookback_days as usize;
        if candles.len() > keep {
            candles.drain(..candles.len() - keep);
        }

        info!("Loaded {} bars for {} from {}", candles.len(), profile.symbol, path.display());
        Ok(candles)
    }
}

// =============================================================================
// Yahoo Finance Fetcher
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    #[serde(default)]
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Daily bars from the public Yahoo Finance chart endpoint
pub struct YahooDataFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl YahooDataFetcher {
    pub fn new() -> LevelsResult<Self> {
        Self::with_base_url(YAHOO_CHART_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> LevelsResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch raw chart JSON for a ticker
    fn fetch_chart(&self, ticker: &str, lookback_days: u32) -> LevelsResult<String> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ticker);
        let range = format!("{}d", lookback_days);

        debug!("GET {} range={}", url, range);
        let response = self
            .client
            .get(&url)
            .query(&[("range", range.as_str()), ("interval", "1d")])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(LevelsError::Network(format!(
                "{} returned status {}",
                ticker, status
            )));
        }

        Ok(response.text()?)
    }
}

impl SeriesProvider for YahooDataFetcher {
    fn name(&self) -> &str {
        "yahoo"
    }

    fn fetch_daily_bars(
        &self,
        profile: &InstrumentProfile,
        lookback_days: u32,
    ) -> LevelsResult<Vec<Candle>> {
        let body = self.fetch_chart(&profile.ticker, lookback_days)?;
        let candles = parse_chart(&profile.ticker, &body)?;

        info!("Fetched {} bars for {} ({})", candles.len(), profile.symbol, profile.ticker);
        Ok(candles)
    }
}

/// Turn a chart payload into ordered bars.
///
/// Sessions with any missing OHLCV field are dropped rather than patched.
pub fn parse_chart(ticker: &str, body: &str) -> LevelsResult<Vec<Candle>> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| LevelsError::DataFormat {
            origin: ticker.to_string(),
            reason: e.to_string(),
        })?;

    if let Some(err) = envelope.chart.error {
        return Err(LevelsError::Network(format!(
            "{}: {} {}",
            ticker, err.code, err.description
        )));
    }

    let result = envelope
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| LevelsError::EmptyResult(ticker.to_string()))?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(result.timestamp.len());
    let mut dropped = 0usize;
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let at = |series: &[Option<f64>]| series.get(i).copied().flatten();
        let row = (
            DateTime::from_timestamp(ts, 0),
            at(&quote.open),
            at(&quote.high),
            at(&quote.low),
            at(&quote.close),
            at(&quote.volume),
        );

        match row {
            (Some(datetime), Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                candles.push(Candle {
                    datetime,
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
            }
            _ => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("{}: dropped {} incomplete sessions", ticker, dropped);
    }

    let candles = normalize(candles);
    if candles.is_empty() {
        return Err(LevelsError::EmptyResult(ticker.to_string()));
    }

    Ok(candles)
}

/// Sort by time (oldest first) and deduplicate by session
fn normalize(mut candles: Vec<Candle>) -> Vec<Candle> {
    // newest revision of a repeated session wins
    candles.reverse();
    candles.sort_by_key(|c| c.datetime);
    candles.dedup_by_key(|c| c.datetime);
    candles
}

// =============================================================================
// Data Validation
// =============================================================================

/// Check every bar and the session ordering.
pub fn validate_series(candles: &[Candle]) -> LevelsResult<()> {
    let mut previous: Option<DateTime<Utc>> = None;

    for candle in candles {
        candle.validate().map_err(|source| LevelsError::InvalidBar {
            datetime: candle.datetime,
            source,
        })?;

        if let Some(prev) = previous {
            if candle.datetime <= prev {
                warn!("Bar at {} is not after {}", candle.datetime, prev);
                return Err(LevelsError::InvalidBar {
                    datetime: candle.datetime,
                    source: crate::types::CandleValidationError::NotChronological {
                        previous: prev,
                    },
                });
            }
        }
        previous = Some(candle.datetime);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
