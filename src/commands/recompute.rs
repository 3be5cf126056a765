//! Recompute command - rebuild every level from fresh daily bars

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use daily_levels::data::{CsvSeriesProvider, DataSource, SeriesProvider, YahooDataFetcher};
use daily_levels::params::{self, Mode};
use daily_levels::{Config, JsonFileStore};
use std::path::PathBuf;
use tracing::info;

pub fn run(config: Config, source: String, data_dir: Option<PathBuf>) -> Result<()> {
    let source: DataSource = source.parse().map_err(|e: String| anyhow!(e))?;

    let provider: Box<dyn SeriesProvider> = match source {
        DataSource::Yahoo => {
            Box::new(YahooDataFetcher::new().context("Failed to build HTTP client")?)
        }
        DataSource::Csv => {
            let dir = data_dir.unwrap_or_else(|| config.data_dir.clone());
            info!("Reading bars from: {}", dir.display());
            Box::new(CsvSeriesProvider::new(dir))
        }
    };

    let store = JsonFileStore::new(&config.output);
    let outcome = params::run(Mode::Recompute(&*provider), &config, &store, Utc::now())
        .context("Recompute failed; parameter file left untouched")?;

    report(&config, outcome.written);
    Ok(())
}

pub(crate) fn report(config: &Config, written: bool) {
    let state = if written { "updated" } else { "unchanged" };
    println!("{} {}", config.output.display(), state);
}
