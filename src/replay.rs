//! Offline replay and squeeze-length analysis
//!
//! [`replay`] recomputes ATR, percentile rank and squeeze decisions for a
//! whole signal series using the batch indicator functions. It reaches the
//! same decisions, bar for bar, as [`SqueezeBreakoutDetector`] fed the same
//! bars one at a time.
//!
//! [`SqueezeBreakoutDetector`]: crate::strategy::SqueezeBreakoutDetector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::breakout::BreakoutTrigger;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::indicators::{atr_percentile_rank, wilder_atr};
use crate::regime::{RegimeClassifier, VolatilityRegime};
use crate::squeeze::{SqueezeTracker, SqueezeUpdate};
use crate::types::{ClosedTrade, Direction};
use crate::Candle;

/// What the squeeze logic concluded on one signal bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BarDecision {
    /// Fewer than `min_history` bars so far
    Warmup,
    /// The tracker refused the bar (undefined or non-positive ATR)
    Skipped,
    Idle,
    InSqueeze { bars: usize, high: f64, low: f64 },
    SqueezeEnd {
        bars: usize,
        high: f64,
        low: f64,
        /// Breakout direction before the regime filter; `None` when the close
        /// stayed inside the range or the range/ATR was invalid
        candidate: Option<Direction>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayBar {
    pub time: DateTime<Utc>,
    pub atr: Option<f64>,
    pub rank: f64,
    pub decision: BarDecision,
}

/// Recompute squeeze decisions for a whole signal series.
///
/// Every bar must be well formed; the first malformed bar aborts the replay.
pub fn replay(bars: &[Candle], config: &EngineConfig) -> EngineResult<Vec<ReplayBar>> {
    for bar in bars {
        bar.validate()?;
    }

    let high: Vec<f64> = bars.iter().map(|c| c.high).collect();
    let low: Vec<f64> = bars.iter().map(|c| c.low).collect();
    let close: Vec<f64> = bars.iter().map(|c| c.close).collect();
    let atr = wilder_atr(&high, &low, &close, config.atr_period);

    let min_history = config.min_history();
    let trigger = BreakoutTrigger::new();
    let mut tracker = SqueezeTracker::new(config.squeeze_pctile);
    let mut out = Vec::with_capacity(bars.len());

    for (idx, bar) in bars.iter().enumerate() {
        let rank = atr_percentile_rank(&atr, idx, config.lookback);

        let decision = if idx + 1 < min_history {
            BarDecision::Warmup
        } else {
            match tracker.update(bar, rank, atr[idx].unwrap_or(f64::NAN)) {
                Err(_) => BarDecision::Skipped,
                Ok(SqueezeUpdate::Idle) => BarDecision::Idle,
                Ok(SqueezeUpdate::Squeezing { high, low, bars }) => {
                    BarDecision::InSqueeze { bars, high, low }
                }
                Ok(SqueezeUpdate::Ended(end)) => BarDecision::SqueezeEnd {
                    bars: end.bars,
                    high: end.squeeze_high,
                    low: end.squeeze_low,
                    candidate: trigger
                        .validate_candidate(&end)
                        .ok()
                        .and_then(|_| trigger.direction(&end)),
                },
            }
        };

        out.push(ReplayBar {
            time: bar.datetime,
            atr: atr[idx],
            rank,
            decision,
        });
    }

    Ok(out)
}

/// Breakout entries from a replay, in order.
///
/// The regime is polled once per candidate and applied as the live trigger
/// applies it: `low_vol` drops the candidate, a classifier fault keeps it.
/// Open positions are not modeled, so while a live engine holds a position
/// this list can contain entries the engine would ignore.
pub fn candidates(
    replayed: &[ReplayBar],
    regime: &dyn RegimeClassifier,
) -> Vec<(DateTime<Utc>, Direction)> {
    replayed
        .iter()
        .filter_map(|r| match r.decision {
            BarDecision::SqueezeEnd {
                candidate: Some(direction),
                ..
            } => Some((r.time, direction)),
            _ => None,
        })
        .filter(|_| {
            !matches!(
                regime.classify(),
                Ok(info) if info.volatility == VolatilityRegime::LowVol
            )
        })
        .collect()
}

// =============================================================================
// Squeeze-length outcome analysis
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqueezeBucket {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl SqueezeBucket {
    pub const ALL: [SqueezeBucket; 4] = [
        SqueezeBucket::Short,
        SqueezeBucket::Medium,
        SqueezeBucket::Long,
        SqueezeBucket::VeryLong,
    ];

    pub fn from_bars(bars: usize) -> Self {
        match bars {
            0..=5 => SqueezeBucket::Short,
            6..=12 => SqueezeBucket::Medium,
            13..=24 => SqueezeBucket::Long,
            _ => SqueezeBucket::VeryLong,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SqueezeBucket::Short => "Short (1-5)",
            SqueezeBucket::Medium => "Medium (6-12)",
            SqueezeBucket::Long => "Long (13-24)",
            SqueezeBucket::VeryLong => "Very Long (25+)",
        }
    }
}

impl std::fmt::Display for SqueezeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome statistics for a group of trades, measured in realized R
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub trades: usize,
    /// Percent of trades with positive realized R
    pub win_rate: f64,
    pub mean_r: f64,
    /// Sample standard deviation; 0.0 for fewer than two trades
    pub std_r: f64,
    pub mean_mfe: f64,
    pub mean_updates_held: f64,
}

impl OutcomeStats {
    pub fn from_trades<'a, I>(trades: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a ClosedTrade>,
    {
        let trades: Vec<&ClosedTrade> = trades.into_iter().collect();
        if trades.is_empty() {
            return None;
        }

        let r: Vec<f64> = trades.iter().map(|t| t.realized_r).collect();
        let mfe: Vec<f64> = trades.iter().map(|t| t.mfe_r).collect();
        let held: Vec<f64> = trades.iter().map(|t| t.updates_held as f64).collect();
        let wins = trades.iter().filter(|t| t.is_winner()).count();

        let std_r = if r.len() > 1 { r.iter().std_dev() } else { 0.0 };

        Some(OutcomeStats {
            trades: trades.len(),
            win_rate: wins as f64 / trades.len() as f64 * 100.0,
            mean_r: r.iter().mean(),
            std_r,
            mean_mfe: mfe.iter().mean(),
            mean_updates_held: held.iter().mean(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub bucket: SqueezeBucket,
    pub stats: OutcomeStats,
}

/// Group trades by the length of the squeeze that produced them.
/// Empty buckets are omitted.
pub fn squeeze_length_analysis(trades: &[ClosedTrade]) -> Vec<BucketStats> {
    SqueezeBucket::ALL
        .iter()
        .filter_map(|&bucket| {
            let group = trades
                .iter()
                .filter(|t| SqueezeBucket::from_bars(t.context.squeeze_bars) == bucket);
            OutcomeStats::from_trades(group).map(|stats| BucketStats { bucket, stats })
        })
        .collect()
}

/// Outcome of trades whose squeeze lasted at least each threshold
pub fn min_length_analysis(
    trades: &[ClosedTrade],
    thresholds: &[usize],
) -> Vec<(usize, OutcomeStats)> {
    thresholds
        .iter()
        .filter_map(|&min_bars| {
            let group = trades.iter().filter(|t| t.context.squeeze_bars >= min_bars);
            OutcomeStats::from_trades(group).map(|stats| (min_bars, stats))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{FixedRegime, RegimeError, RegimeInfo};
    use crate::types::{ExitReason, TradeContext};
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn trade(squeeze_bars: usize, realized_r: f64, mfe_r: f64) -> ClosedTrade {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ClosedTrade {
            direction: Direction::Long,
            entry_time: t,
            exit_time: t + Duration::hours(5),
            entry_price: 100.0,
            exit_price: 100.0 + realized_r,
            initial_size: 1.0,
            partials_taken: 0,
            r_multiple: realized_r,
            realized_r,
            mfe_r,
            reason: ExitReason::ForceClosed,
            updates_held: 20,
            context: TradeContext {
                atr: 1.0,
                stop_distance: 1.0,
                risk_pct: 3.0,
                position_size: 1.0,
                direction: Direction::Long,
                pattern: None,
                squeeze_bars,
                volatility: None,
            },
        }
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(SqueezeBucket::from_bars(1), SqueezeBucket::Short);
        assert_eq!(SqueezeBucket::from_bars(5), SqueezeBucket::Short);
        assert_eq!(SqueezeBucket::from_bars(6), SqueezeBucket::Medium);
        assert_eq!(SqueezeBucket::from_bars(12), SqueezeBucket::Medium);
        assert_eq!(SqueezeBucket::from_bars(13), SqueezeBucket::Long);
        assert_eq!(SqueezeBucket::from_bars(24), SqueezeBucket::Long);
        assert_eq!(SqueezeBucket::from_bars(25), SqueezeBucket::VeryLong);
    }

    #[test]
    fn test_squeeze_length_analysis() {
        let trades = vec![
            trade(3, 2.0, 3.0),
            trade(4, -1.0, 0.5),
            trade(30, 1.0, 1.5),
        ];
        let stats = squeeze_length_analysis(&trades);
        assert_eq!(stats.len(), 2);

        assert_eq!(stats[0].bucket, SqueezeBucket::Short);
        assert_eq!(stats[0].stats.trades, 2);
        assert_relative_eq!(stats[0].stats.win_rate, 50.0);
        assert_relative_eq!(stats[0].stats.mean_r, 0.5);
        assert_relative_eq!(stats[0].stats.mean_mfe, 1.75);
        // sample std-dev of [2, -1]
        assert_relative_eq!(stats[0].stats.std_r, 4.5_f64.sqrt(), epsilon = 1e-12);

        assert_eq!(stats[1].bucket, SqueezeBucket::VeryLong);
        assert_eq!(stats[1].stats.std_r, 0.0);
    }

    #[test]
    fn test_min_length_analysis() {
        let trades = vec![trade(3, 2.0, 3.0), trade(10, -1.0, 0.5), trade(30, 1.0, 1.5)];
        let rows = min_length_analysis(&trades, &[1, 10, 50]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (1, OutcomeStats::from_trades(&trades).unwrap()));
        assert_eq!(rows[1].1.trades, 2);
    }

    #[test]
    fn test_replay_warmup_and_malformed() {
        let config = EngineConfig::default().with_atr_period(2).with_lookback(3);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars: Vec<Candle> = (0..8)
            .map(|i| {
                Candle::new_unchecked(t + Duration::hours(i), 100.0, 101.0, 99.0, 100.0, 1.0)
            })
            .collect();

        let out = replay(&bars, &config).unwrap();
        // min_history = 2 + 3 + 2
        assert!(out[..6].iter().all(|r| r.decision == BarDecision::Warmup));
        assert_ne!(out[6].decision, BarDecision::Warmup);

        let mut bad = bars.clone();
        bad[3].high = 98.0;
        assert!(replay(&bad, &config).is_err());
    }

    struct Unavailable;

    impl RegimeClassifier for Unavailable {
        fn classify(&self) -> Result<RegimeInfo, RegimeError> {
            Err(RegimeError::NotReady("no data".to_string()))
        }
    }

    #[test]
    fn test_candidates_apply_regime_filter() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = |hours: i64, candidate: Option<Direction>| ReplayBar {
            time: t + Duration::hours(hours),
            atr: Some(1.0),
            rank: 60.0,
            decision: BarDecision::SqueezeEnd {
                bars: 4,
                high: 101.0,
                low: 99.0,
                candidate,
            },
        };
        let replayed = vec![
            end(0, Some(Direction::Long)),
            end(1, None),
            end(2, Some(Direction::Short)),
        ];

        let high_vol = candidates(&replayed, &FixedRegime::default());
        assert_eq!(
            high_vol,
            vec![(t, Direction::Long), (t + Duration::hours(2), Direction::Short)]
        );

        let low_vol = FixedRegime::volatility(VolatilityRegime::LowVol);
        assert!(candidates(&replayed, &low_vol).is_empty());

        assert_eq!(candidates(&replayed, &Unavailable), high_vol);
    }
}
