//! Backtest command implementation

use anyhow::{Context, Result};
use squeeze_breakout::backtest::Backtester;
use squeeze_breakout::regime::FixedRegime;
use squeeze_breakout::replay::squeeze_length_analysis;
use squeeze_breakout::BarLabel;
use tracing::info;

use super::{load_bars, load_config};

pub fn run(
    config_path: String,
    signal_path: String,
    exec_path: String,
    capital_override: Option<f64>,
    bar_label: Option<BarLabel>,
    output: Option<String>,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = load_config(&config_path, bar_label)?;

    if let Some(capital) = capital_override {
        info!("Overriding initial capital to: {:.2}", capital);
        config.backtest.initial_capital = capital;
    }

    let signal_bars = load_bars(&signal_path)?;
    let exec_bars = load_bars(&exec_path)?;

    let regime = FixedRegime::volatility(config.backtest.volatility);
    info!("Regime: fixed {}", config.backtest.volatility);

    let mut backtester = Backtester::new(config.clone())?;
    let result = backtester.run(&signal_bars, &exec_bars, &regime)?;
    let s = &result.summary;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {}", s.initial_capital);
    println!("Final Equity:       {}", s.final_equity);
    println!("Total Return:       {:.2}%", s.total_return_pct);
    println!("Max Drawdown:       {:.2}%", s.max_drawdown_pct);
    println!("Total Trades:       {}", s.total_trades);
    println!("Winning Trades:     {}", s.winning_trades);
    println!("Losing Trades:      {}", s.losing_trades);
    println!("Win Rate:           {:.2}%", s.win_rate);
    println!("Mean R:             {:.2}", s.mean_r);
    println!("Total R:            {:.2}", s.total_r);
    println!("Best R:             {:.2}", s.best_r);
    println!("Worst R:            {:.2}", s.worst_r);
    println!("{}", "=".repeat(60));

    let buckets = squeeze_length_analysis(&result.trades);
    if !buckets.is_empty() {
        println!("\nBY SQUEEZE LENGTH");
        println!(
            "{:<18} {:>5} {:>6} {:>7} {:>7} {:>8}",
            "Bucket", "N", "Win%", "Avg R", "Std R", "Avg MFE"
        );
        for b in &buckets {
            println!(
                "{:<18} {:>5} {:>5.0}% {:>7.2} {:>7.2} {:>8.2}",
                b.bucket.label(),
                b.stats.trades,
                b.stats.win_rate,
                b.stats.mean_r,
                b.stats.std_r,
                b.stats.mean_mfe
            );
        }
    }

    if let Some(path) = output {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create output file {}", path))?;
        serde_json::to_writer_pretty(file, &result.trades)
            .context("Failed to write trades JSON")?;
        info!("Wrote {} trades to {}", result.trades.len(), path);
    }

    info!("Backtest completed successfully");

    Ok(())
}
