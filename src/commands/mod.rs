//! Subcommand implementations

pub mod backtest;
pub mod replay;

use anyhow::{bail, Result};
use squeeze_breakout::{data, BarLabel, Candle, Config};
use std::path::Path;
use tracing::{info, warn};

/// Load the config file, or the built-in defaults when it does not exist.
/// A `--bar-label` flag overrides the file.
fn load_config(path: &str, bar_label: Option<BarLabel>) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let config = Config::from_file(path)?;
        info!("Loaded configuration from: {}", path);
        config
    } else {
        info!("Config {} not found, using defaults", path);
        Config::default()
    };

    if let Some(label) = bar_label {
        config.data.bar_label = label;
    }
    info!("Bars labeled by {:?} time", config.data.bar_label);

    Ok(config)
}

/// Load a CSV and check it before it reaches the engine
fn load_bars(path: &str) -> Result<Vec<Candle>> {
    let bars = data::load_csv(path)?;
    let report = data::validate_candles(&bars);

    for warning in &report.warnings {
        warn!("{}: {}", path, warning);
    }
    if !report.is_valid() {
        bail!("{}: {}", path, report.errors.join("; "));
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(name: &str, rows: &[&str]) -> String {
        let path = std::env::temp_dir().join(format!(
            "squeeze_breakout_cmd_{}_{}.csv",
            name,
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "datetime,open,high,low,close,volume").unwrap();
        for row in rows {
            writeln!(f, "{}", row).unwrap();
        }
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_bars_accepts_gaps_and_rejects_disorder() {
        let gapped = write_csv(
            "gapped",
            &[
                "2024-01-01 00:00:00,100,101,99,100,1",
                "2024-01-01 01:00:00,100,101,99,100,1",
                "2024-01-01 05:00:00,100,101,99,100,1",
            ],
        );
        assert_eq!(load_bars(&gapped).unwrap().len(), 3);

        let disordered = write_csv(
            "disordered",
            &[
                "2024-01-01 01:00:00,100,101,99,100,1",
                "2024-01-01 00:00:00,100,101,99,100,1",
            ],
        );
        let err = load_bars(&disordered).unwrap_err();
        assert!(err.to_string().contains("not chronological"));

        std::fs::remove_file(&gapped).ok();
        std::fs::remove_file(&disordered).ok();
    }

    #[test]
    fn test_bar_label_flag_overrides_config() {
        let config = load_config("does/not/exist.json", Some(BarLabel::Open)).unwrap();
        assert_eq!(config.data.bar_label, BarLabel::Open);
        let config = load_config("does/not/exist.json", None).unwrap();
        assert_eq!(config.data.bar_label, BarLabel::Close);
    }
}
