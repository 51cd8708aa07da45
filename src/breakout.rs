//! Breakout trigger
//!
//! Turns a squeeze end into at most one directional entry. The regime is
//! polled once per squeeze end; a classifier fault lets the trade through.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regime::{RegimeClassifier, VolatilityRegime};
use crate::squeeze::SqueezeEnd;
use crate::types::Direction;

/// Why a squeeze end did not produce an entry
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Rejection {
    #[error("degenerate squeeze range: high {high} <= low {low}")]
    DegenerateRange { high: f64, low: f64 },

    #[error("invalid ATR at squeeze end: {0}")]
    InvalidAtr(f64),

    #[error("blocked by {0} regime")]
    RegimeBlocked(VolatilityRegime),

    #[error("close {close} inside squeeze range [{low}, {high}]")]
    InsideRange { close: f64, high: f64, low: f64 },
}

/// Directional entry decision produced by an entry detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub time: chrono::DateTime<chrono::Utc>,
    pub direction: Direction,
    /// Signal-bar close; the requested entry price
    pub price: f64,
    /// Signal-cadence ATR at the decision bar
    pub atr: f64,
    /// `None` when the regime classifier was unavailable
    pub volatility: Option<VolatilityRegime>,
    pub squeeze_bars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BreakoutTrigger;

impl BreakoutTrigger {
    pub fn new() -> Self {
        BreakoutTrigger
    }

    /// Range and ATR checks, independent of regime and close
    pub fn validate_candidate(&self, end: &SqueezeEnd) -> Result<(), Rejection> {
        if end.squeeze_high.is_nan()
            || end.squeeze_low.is_nan()
            || end.squeeze_high <= end.squeeze_low
        {
            return Err(Rejection::DegenerateRange {
                high: end.squeeze_high,
                low: end.squeeze_low,
            });
        }
        if end.atr.is_nan() || end.atr <= 0.0 {
            return Err(Rejection::InvalidAtr(end.atr));
        }
        Ok(())
    }

    /// Direction implied by the close alone
    pub fn direction(&self, end: &SqueezeEnd) -> Option<Direction> {
        if end.close > end.squeeze_high {
            Some(Direction::Long)
        } else if end.close < end.squeeze_low {
            Some(Direction::Short)
        } else {
            None
        }
    }

    pub fn evaluate<R>(&self, end: &SqueezeEnd, regime: &R) -> Result<EntrySignal, Rejection>
    where
        R: RegimeClassifier + ?Sized,
    {
        self.validate_candidate(end)?;

        let volatility = match regime.classify() {
            Ok(info) => Some(info.volatility),
            Err(e) => {
                tracing::warn!(error = %e, "Regime unavailable at squeeze end, allowing trade");
                None
            }
        };

        if volatility == Some(VolatilityRegime::LowVol) {
            return Err(Rejection::RegimeBlocked(VolatilityRegime::LowVol));
        }

        let direction = self.direction(end).ok_or(Rejection::InsideRange {
            close: end.close,
            high: end.squeeze_high,
            low: end.squeeze_low,
        })?;

        Ok(EntrySignal {
            time: end.time,
            direction,
            price: end.close,
            atr: end.atr,
            volatility,
            squeeze_bars: end.bars,
            pattern: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{FixedRegime, RegimeError, RegimeInfo};
    use chrono::{TimeZone, Utc};

    struct Broken;

    impl RegimeClassifier for Broken {
        fn classify(&self) -> Result<RegimeInfo, RegimeError> {
            Err(RegimeError::Failed("no 4h data".to_string()))
        }
    }

    fn end(high: f64, low: f64, close: f64, atr: f64) -> SqueezeEnd {
        SqueezeEnd {
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            squeeze_high: high,
            squeeze_low: low,
            close,
            atr,
            rank: 40.0,
            bars: 4,
        }
    }

    #[test]
    fn test_long_breakout() {
        let signal = BreakoutTrigger::new()
            .evaluate(&end(100.0, 95.0, 101.0, 2.0), &FixedRegime::default())
            .unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.price, 101.0);
        assert_eq!(signal.squeeze_bars, 4);
        assert_eq!(signal.volatility, Some(VolatilityRegime::HighVol));
    }

    #[test]
    fn test_short_breakout() {
        let signal = BreakoutTrigger::new()
            .evaluate(&end(100.0, 95.0, 94.0, 2.0), &FixedRegime::default())
            .unwrap();
        assert_eq!(signal.direction, Direction::Short);
    }

    #[test]
    fn test_close_inside_range_is_no_signal() {
        let result =
            BreakoutTrigger::new().evaluate(&end(100.0, 95.0, 100.0, 2.0), &FixedRegime::default());
        assert!(matches!(result, Err(Rejection::InsideRange { .. })));
    }

    #[test]
    fn test_degenerate_range_rejected() {
        let result =
            BreakoutTrigger::new().evaluate(&end(50.0, 50.0, 51.0, 2.0), &FixedRegime::default());
        assert!(matches!(result, Err(Rejection::DegenerateRange { .. })));
    }

    #[test]
    fn test_invalid_atr_rejected() {
        let result =
            BreakoutTrigger::new().evaluate(&end(100.0, 95.0, 101.0, 0.0), &FixedRegime::default());
        assert_eq!(result.unwrap_err(), Rejection::InvalidAtr(0.0));
    }

    #[test]
    fn test_low_vol_blocks() {
        let regime = FixedRegime::volatility(VolatilityRegime::LowVol);
        let result = BreakoutTrigger::new().evaluate(&end(100.0, 95.0, 101.0, 2.0), &regime);
        assert_eq!(
            result.unwrap_err(),
            Rejection::RegimeBlocked(VolatilityRegime::LowVol)
        );
    }

    #[test]
    fn test_regime_fault_fails_open() {
        let signal = BreakoutTrigger::new()
            .evaluate(&end(100.0, 95.0, 101.0, 2.0), &Broken)
            .unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.volatility, None);
    }
}
