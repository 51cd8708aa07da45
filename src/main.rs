//! Squeeze breakout - main entry point
//!
//! This binary provides two subcommands:
//! - backtest: Run the engine over a signal series and a nested execution series
//! - replay: Recompute ATR, rank and squeeze decisions for a signal series

use anyhow::Result;
use clap::{Parser, Subcommand};
use squeeze_breakout::BarLabel;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "squeeze-breakout")]
#[command(about = "ATR squeeze breakout engine with R-multiple exits", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a backtest
    Backtest {
        /// Configuration file path
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Signal-cadence OHLCV CSV (e.g. 1h)
        #[arg(long)]
        signal_data: String,

        /// Execution-cadence OHLCV CSV nested in the signal bars (e.g. 15m)
        #[arg(long)]
        exec_data: String,

        /// Override initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Whether both CSVs stamp bars with their open or close time
        #[arg(long)]
        bar_label: Option<BarLabel>,

        /// Write closed trades as JSON
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Replay squeeze decisions over a signal series
    Replay {
        /// Configuration file path
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Signal-cadence OHLCV CSV
        #[arg(long)]
        signal_data: String,

        /// Whether the CSV stamps bars with their open or close time
        #[arg(long)]
        bar_label: Option<BarLabel>,

        /// Write per-bar decisions as JSON
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

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

    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Backtest { .. } => "backtest",
        Commands::Replay { .. } => "replay",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Backtest {
            config,
            signal_data,
            exec_data,
            capital,
            bar_label,
            output,
        } => commands::backtest::run(config, signal_data, exec_data, capital, bar_label, output),

        Commands::Replay {
            config,
            signal_data,
            bar_label,
            output,
        } => commands::replay::run(config, signal_data, bar_label, output),
    }
}
