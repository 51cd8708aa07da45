//! Data loading and validation
//!
//! OHLCV candles come from CSV files with the columns
//! `datetime,open,high,low,close,volume`. Datetimes are RFC 3339 or
//! `%Y-%m-%d %H:%M:%S` taken as UTC. Files stamped with bar open time are
//! restamped to close time with [`to_close_labels`] before they reach the
//! engine.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use itertools::Itertools;
use std::borrow::Cow;
use std::path::Path;
use tracing::info;

use crate::{BarLabel, Candle};

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file.
///
/// Rows are validated as they are read; the first malformed row fails the
/// load with its row number.
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Failed to read row {}", row))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_datetime(dt_str)
            .with_context(|| format!("Row {}: failed to parse datetime: {}", row, dt_str))?;

        let field = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Row {}: missing {} column", row, name))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Row {}: failed to parse {}", row, name))
        };

        let candle = Candle::new(
            datetime,
            field(1, "open")?,
            field(2, "high")?,
            field(3, "low")?,
            field(4, "close")?,
            field(5, "volume")?,
        )
        .with_context(|| format!("Row {}: invalid candle", row))?;

        candles.push(candle);
    }

    info!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

// =============================================================================
// Data Validation
// =============================================================================

/// Fail unless timestamps are strictly increasing
pub fn ensure_monotonic(candles: &[Candle]) -> Result<()> {
    if let Some((i, (a, b))) = candles
        .iter()
        .tuple_windows()
        .enumerate()
        .find(|(_, (a, b))| b.datetime <= a.datetime)
    {
        bail!(
            "Candle {} ({}) is not after candle {} ({})",
            i + 1,
            b.datetime,
            i,
            a.datetime
        );
    }
    Ok(())
}

/// Smallest positive spacing between consecutive candles
pub fn bar_interval(candles: &[Candle]) -> Option<Duration> {
    candles
        .iter()
        .tuple_windows()
        .map(|(a, b)| b.datetime - a.datetime)
        .filter(|gap| *gap > Duration::zero())
        .min()
}

/// Restamp candles so that each `datetime` is the bar's close time.
///
/// Close-labeled input is borrowed unchanged. Open-labeled input is shifted
/// forward by [`bar_interval`], which needs at least two candles.
pub fn to_close_labels(candles: &[Candle], label: BarLabel) -> Result<Cow<'_, [Candle]>> {
    if label == BarLabel::Close || candles.is_empty() {
        return Ok(Cow::Borrowed(candles));
    }
    let interval = bar_interval(candles)
        .context("Cannot infer the bar interval of open-labeled data from one candle")?;
    Ok(Cow::Owned(
        candles
            .iter()
            .map(|c| Candle {
                datetime: c.datetime + interval,
                ..c.clone()
            })
            .collect(),
    ))
}

/// Validate candle data for consistency
pub fn validate_candles(candles: &[Candle]) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candles.is_empty() {
        errors.push("No candles provided".to_string());
        return ValidationResult { errors, warnings };
    }

    for (i, candle) in candles.iter().enumerate() {
        if let Err(e) = candle.validate() {
            errors.push(format!("Candle {}: {}", i, e));
        }
    }

    for (i, (a, b)) in candles.iter().tuple_windows().enumerate() {
        if b.datetime <= a.datetime {
            errors.push(format!("Candle {}: not chronological", i + 1));
        } else if i > 0 {
            let gap = b.datetime - a.datetime;
            let prev_gap = a.datetime - candles[i - 1].datetime;
            if gap > prev_gap * 2 {
                warnings.push(format!("Candle {}: gap of {} minutes", i + 1, gap.num_minutes()));
            }
        }
    }

    ValidationResult { errors, warnings }
}

/// Result of data validation
#[derive(Debug)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn candle(minutes: i64) -> Candle {
        let t =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        Candle::new_unchecked(t, 100.0, 105.0, 95.0, 102.0, 1000.0)
    }

    fn write_csv(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "squeeze_breakout_{}_{}.csv",
            name,
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_csv_both_datetime_formats() {
        let path = write_csv(
            "formats",
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:00:00,100,105,95,102,10\n\
             2024-01-01T01:00:00Z,102,106,101,104,12\n",
        );
        let candles = load_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].datetime, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(candles[1].close, 104.0);
    }

    #[test]
    fn test_load_csv_rejects_malformed_row() {
        let path = write_csv(
            "malformed",
            "datetime,open,high,low,close,volume\n\
             2024-01-01 00:00:00,100,95,105,102,10\n",
        );
        let err = load_csv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(format!("{:#}", err).contains("Row 1"));
    }

    #[test]
    fn test_ensure_monotonic() {
        assert!(ensure_monotonic(&[candle(0), candle(15), candle(30)]).is_ok());
        assert!(ensure_monotonic(&[candle(0), candle(15), candle(15)]).is_err());
        assert!(ensure_monotonic(&[]).is_ok());
    }

    #[test]
    fn test_validate_candles() {
        let result = validate_candles(&[candle(0), candle(60)]);
        assert!(result.is_valid());

        let mut bad = candle(120);
        bad.high = 90.0;
        let result = validate_candles(&[candle(0), bad]);
        assert!(!result.is_valid());

        assert!(!validate_candles(&[]).is_valid());
    }

    #[test]
    fn test_validate_candles_warns_on_gap() {
        let result = validate_candles(&[candle(0), candle(15), candle(30), candle(120)]);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("90 minutes"));
    }

    #[test]
    fn test_bar_interval_uses_smallest_gap() {
        let bars = [candle(0), candle(15), candle(30), candle(120)];
        assert_eq!(bar_interval(&bars), Some(Duration::minutes(15)));
        assert_eq!(bar_interval(&bars[..1]), None);
    }

    #[test]
    fn test_open_labels_shift_by_one_interval() {
        let bars = [candle(0), candle(60), candle(120)];
        let shifted = to_close_labels(&bars, BarLabel::Open).unwrap();
        assert_eq!(shifted[0].datetime, candle(60).datetime);
        assert_eq!(shifted[2].datetime, candle(180).datetime);
        assert_eq!(shifted[1].close, bars[1].close);

        let same = to_close_labels(&bars, BarLabel::Close).unwrap();
        assert!(matches!(same, Cow::Borrowed(_)));

        assert!(to_close_labels(&bars[..1], BarLabel::Open).is_err());
        assert!(to_close_labels(&[], BarLabel::Open).unwrap().is_empty());
    }
}
