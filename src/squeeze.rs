//! Squeeze state tracker
//!
//! While the ATR percentile rank stays below the threshold the tracker widens
//! a high/low range bar by bar. The first bar at or above the threshold ends
//! the squeeze: the range is emitted once and the state is cleared, whether or
//! not a trade follows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SqueezeState {
    pub in_squeeze: bool,
    pub squeeze_high: Option<f64>,
    pub squeeze_low: Option<f64>,
    /// Consecutive signal bars spent in the current squeeze
    pub bars: usize,
}

/// A squeeze that just ended; the breakout candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SqueezeEnd {
    pub time: DateTime<Utc>,
    pub squeeze_high: f64,
    pub squeeze_low: f64,
    pub close: f64,
    pub atr: f64,
    pub rank: f64,
    pub bars: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqueezeUpdate {
    /// Not in a squeeze and none just ended
    Idle,
    Squeezing { high: f64, low: f64, bars: usize },
    Ended(SqueezeEnd),
}

#[derive(Debug, Clone)]
pub struct SqueezeTracker {
    squeeze_pctile: f64,
    state: SqueezeState,
}

impl SqueezeTracker {
    pub fn new(squeeze_pctile: f64) -> Self {
        Self {
            squeeze_pctile,
            state: SqueezeState::default(),
        }
    }

    pub fn state(&self) -> &SqueezeState {
        &self.state
    }

    /// Advance one signal bar.
    ///
    /// A malformed bar or a non-positive ATR is rejected before any state
    /// changes.
    pub fn update(&mut self, bar: &Candle, rank: f64, atr: f64) -> EngineResult<SqueezeUpdate> {
        bar.validate()?;
        if !atr.is_finite() || atr <= 0.0 {
            return Err(EngineError::InvalidAtr(atr));
        }

        if rank < self.squeeze_pctile {
            let state = &mut self.state;
            state.in_squeeze = true;
            let high = state.squeeze_high.map_or(bar.high, |h| h.max(bar.high));
            let low = state.squeeze_low.map_or(bar.low, |l| l.min(bar.low));
            state.squeeze_high = Some(high);
            state.squeeze_low = Some(low);
            state.bars += 1;
            return Ok(SqueezeUpdate::Squeezing {
                high,
                low,
                bars: state.bars,
            });
        }

        if !self.state.in_squeeze {
            return Ok(SqueezeUpdate::Idle);
        }

        let ended = self.state;
        self.reset();

        match (ended.squeeze_high, ended.squeeze_low) {
            (Some(squeeze_high), Some(squeeze_low)) => Ok(SqueezeUpdate::Ended(SqueezeEnd {
                time: bar.datetime,
                squeeze_high,
                squeeze_low,
                close: bar.close,
                atr,
                rank,
                bars: ended.bars,
            })),
            _ => Ok(SqueezeUpdate::Idle),
        }
    }

    pub fn reset(&mut self) {
        self.state = SqueezeState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i);
        Candle::new_unchecked(t, close, high, low, close, 1.0)
    }

    #[test]
    fn test_enter_squeeze_initializes_range() {
        let mut tracker = SqueezeTracker::new(25.0);
        let update = tracker.update(&bar(0, 101.0, 99.0, 100.0), 10.0, 1.0).unwrap();
        assert_eq!(
            update,
            SqueezeUpdate::Squeezing {
                high: 101.0,
                low: 99.0,
                bars: 1
            }
        );
        assert!(tracker.state().in_squeeze);
    }

    #[test]
    fn test_range_only_widens() {
        let mut tracker = SqueezeTracker::new(25.0);
        tracker.update(&bar(0, 101.0, 99.0, 100.0), 10.0, 1.0).unwrap();
        // inside bar does not narrow the range
        tracker.update(&bar(1, 100.5, 99.5, 100.0), 10.0, 1.0).unwrap();
        assert_eq!(tracker.state().squeeze_high, Some(101.0));
        assert_eq!(tracker.state().squeeze_low, Some(99.0));

        tracker.update(&bar(2, 102.0, 98.0, 100.0), 10.0, 1.0).unwrap();
        assert_eq!(tracker.state().squeeze_high, Some(102.0));
        assert_eq!(tracker.state().squeeze_low, Some(98.0));
        assert_eq!(tracker.state().bars, 3);
    }

    #[test]
    fn test_squeeze_end_emits_and_resets() {
        let mut tracker = SqueezeTracker::new(25.0);
        tracker.update(&bar(0, 100.0, 95.0, 97.0), 5.0, 1.0).unwrap();
        tracker.update(&bar(1, 99.0, 96.0, 98.0), 5.0, 1.0).unwrap();

        let update = tracker.update(&bar(2, 102.0, 99.0, 101.0), 30.0, 2.0).unwrap();
        match update {
            SqueezeUpdate::Ended(end) => {
                assert_eq!(end.squeeze_high, 100.0);
                assert_eq!(end.squeeze_low, 95.0);
                assert_eq!(end.close, 101.0);
                assert_eq!(end.atr, 2.0);
                assert_eq!(end.bars, 2);
            }
            other => panic!("expected squeeze end, got {:?}", other),
        }
        assert_eq!(*tracker.state(), SqueezeState::default());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut tracker = SqueezeTracker::new(25.0);
        let update = tracker.update(&bar(0, 101.0, 99.0, 100.0), 25.0, 1.0).unwrap();
        assert_eq!(update, SqueezeUpdate::Idle);
    }

    #[test]
    fn test_invalid_atr_leaves_state_unchanged() {
        let mut tracker = SqueezeTracker::new(25.0);
        tracker.update(&bar(0, 101.0, 99.0, 100.0), 10.0, 1.0).unwrap();
        let before = *tracker.state();

        let err = tracker.update(&bar(1, 105.0, 90.0, 100.0), 10.0, 0.0).unwrap_err();
        assert_eq!(err, EngineError::InvalidAtr(0.0));
        assert_eq!(*tracker.state(), before);
    }

    #[test]
    fn test_malformed_bar_leaves_state_unchanged() {
        let mut tracker = SqueezeTracker::new(25.0);
        tracker.update(&bar(0, 101.0, 99.0, 100.0), 10.0, 1.0).unwrap();
        let before = *tracker.state();

        let bad = bar(1, 90.0, 110.0, 100.0);
        assert!(matches!(
            tracker.update(&bad, 10.0, 1.0),
            Err(EngineError::MalformedBar(_))
        ));
        assert_eq!(*tracker.state(), before);
    }
}
