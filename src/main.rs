//! Daily levels - main entry point
//!
//! This binary provides two subcommands:
//! - recompute: Rebuild every level from fresh daily bars
//! - refresh: Move the record's timestamp forward without touching levels

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "daily-levels")]
#[command(about = "Daily support/resistance and ATR risk levels for the EA parameter file", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults to the built-in XAUUSD/BTCUSD tuning)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Parameter record path (overrides config and DAILY_LEVELS_OUTPUT)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Recompute all levels from fresh daily bars
    Recompute {
        /// Data source: "yahoo" (default) or "csv"
        #[arg(short, long, default_value = "yahoo")]
        source: String,

        /// Directory of <SYMBOL>_1d.csv files (csv source only)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Refresh only the timestamp of the existing record (no network access)
    Refresh,
}

fn setup_logging(verbose: bool, command_name: &str, log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = log_dir.join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never(log_dir, &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Recompute { .. } => "recompute",
        Commands::Refresh => "refresh",
    };

    setup_logging(cli.verbose, command_name, &cli.log_dir)?;

    let config = commands::load_config(cli.config.as_deref(), cli.output)?;

    match cli.command {
        Commands::Recompute { source, data_dir } => {
            commands::recompute::run(config, source, data_dir)
        }
        Commands::Refresh => commands::refresh::run(config),
    }
}
