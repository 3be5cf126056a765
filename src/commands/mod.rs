//! Subcommand implementations

use anyhow::{Context, Result};
use daily_levels::Config;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod recompute;
pub mod refresh;

/// Load the configuration file (or defaults) and apply path overrides.
///
/// Precedence for the record path: `--output`, then `DAILY_LEVELS_OUTPUT`,
/// then the config file.
pub fn load_config(config_path: Option<&Path>, output: Option<PathBuf>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            info!("Loaded configuration from: {}", path.display());
            config
        }
        None => {
            info!("Using built-in configuration");
            Config::default()
        }
    };

    config.apply_env();

    if let Some(output) = output {
        info!("Overriding output to: {}", output.display());
        config.output = output;
    }

    Ok(config)
}
