//! Replay command implementation

use anyhow::{Context, Result};
use itertools::Itertools;
use squeeze_breakout::regime::FixedRegime;
use squeeze_breakout::replay::{self, BarDecision, SqueezeBucket};
use squeeze_breakout::{data, BarLabel};
use tracing::info;

use super::{load_bars, load_config};

pub fn run(
    config_path: String,
    signal_path: String,
    bar_label: Option<BarLabel>,
    output: Option<String>,
) -> Result<()> {
    let config = load_config(&config_path, bar_label)?;
    let loaded = load_bars(&signal_path)?;
    data::ensure_monotonic(&loaded)?;
    let bars = data::to_close_labels(&loaded, config.data.bar_label)?;

    let replayed = replay::replay(&bars, &config.engine)?;
    let regime = FixedRegime::volatility(config.backtest.volatility);

    let ends: Vec<(usize, bool)> = replayed
        .iter()
        .filter_map(|r| match r.decision {
            BarDecision::SqueezeEnd { bars, candidate, .. } => Some((bars, candidate.is_some())),
            _ => None,
        })
        .collect();
    let counts = ends
        .iter()
        .counts_by(|(bars, _)| SqueezeBucket::from_bars(*bars));

    println!("\n{}", "=".repeat(60));
    println!("SQUEEZE REPLAY");
    println!("{}", "=".repeat(60));
    println!("Signal bars:        {}", bars.len());
    println!("Warm-up bars:       {}", config.engine.min_history().min(bars.len()));
    println!("Squeezes ended:     {}", ends.len());
    println!("Breakout candidates:{:>5}", ends.iter().filter(|(_, c)| *c).count());
    for bucket in SqueezeBucket::ALL {
        println!("  {:<18} {}", bucket.label(), counts.get(&bucket).copied().unwrap_or(0));
    }
    println!("{}", "=".repeat(60));

    for (time, direction) in replay::candidates(&replayed, &regime) {
        println!("{}  {}", time.format("%Y-%m-%d %H:%M"), direction);
    }

    if let Some(path) = output {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create output file {}", path))?;
        serde_json::to_writer_pretty(file, &replayed).context("Failed to write replay JSON")?;
        info!("Wrote {} bar decisions to {}", replayed.len(), path);
    }

    Ok(())
}
