//! Refresh command - timestamp-only update, no market data

use anyhow::{Context, Result};
use chrono::Utc;
use daily_levels::params::{self, Mode};
use daily_levels::{Config, JsonFileStore};

pub fn run(config: Config) -> Result<()> {
    let store = JsonFileStore::new(&config.output);
    let outcome = params::run(Mode::Refresh, &config, &store, Utc::now())
        .context("Refresh failed; parameter file left untouched")?;

    println!("Updated timestamp to: {}", outcome.record.timestamp);
    super::recompute::report(&config, outcome.written);
    Ok(())
}
