//! R-based risk management
//!
//! Sizes positions so that a stop-out loses a fixed fraction of equity, and
//! derives the R-multiple price ladder and the stop ratchet from the same
//! stop distance.
//!
//! # Currency-Agnostic Design
//!
//! Equity and prices are dimensionless; the only requirement is that they are
//! denominated in the same currency.
//!
//! ```text
//! position_size = (equity * risk_pct) / stop_distance
//! 1R            = stop_distance
//! target(r)     = entry ± r * stop_distance
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::Direction;

/// Maximum number of scheduled partials; the ratchet table has one row per level.
pub const MAX_PARTIALS: usize = 3;

/// One scheduled partial profit-take
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialLevel {
    /// Target distance from entry in R
    pub r_multiple: f64,
    /// Fraction of the ORIGINAL position closed at this level
    pub fraction: f64,
}

impl PartialLevel {
    pub const fn new(r_multiple: f64, fraction: f64) -> Self {
        Self {
            r_multiple,
            fraction,
        }
    }
}

/// Ordered partial schedule. Whatever the fractions leave open is the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialSchedule(Vec<PartialLevel>);

impl Default for PartialSchedule {
    /// 30% at 1R, 30% at 2R, 30% at 3R, 10% runner
    fn default() -> Self {
        PartialSchedule(vec![
            PartialLevel::new(1.0, 0.30),
            PartialLevel::new(2.0, 0.30),
            PartialLevel::new(3.0, 0.30),
        ])
    }
}

impl PartialSchedule {
    pub fn new(levels: Vec<PartialLevel>) -> EngineResult<Self> {
        let schedule = PartialSchedule(levels);
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn levels(&self) -> &[PartialLevel] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fraction of the original size left after every partial is taken
    pub fn runner_fraction(&self) -> f64 {
        (1.0 - self.0.iter().map(|l| l.fraction).sum::<f64>()).max(0.0)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.0.is_empty() || self.0.len() > MAX_PARTIALS {
            return Err(EngineError::InvalidConfig(format!(
                "partial schedule must have 1..={} levels, got {}",
                MAX_PARTIALS,
                self.0.len()
            )));
        }

        let mut prev_r = 0.0;
        for level in &self.0 {
            if level.r_multiple.is_nan() || level.r_multiple <= prev_r {
                return Err(EngineError::InvalidConfig(format!(
                    "partial R-multiples must be positive and increasing (got {} after {})",
                    level.r_multiple, prev_r
                )));
            }
            if level.fraction.is_nan() || level.fraction <= 0.0 || level.fraction > 1.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "partial fraction {} outside (0, 1]",
                    level.fraction
                )));
            }
            prev_r = level.r_multiple;
        }

        let total: f64 = self.0.iter().map(|l| l.fraction).sum();
        if total > 1.0 + 1e-9 {
            return Err(EngineError::InvalidConfig(format!(
                "partial fractions sum to {:.4} (> 1.0)",
                total
            )));
        }

        Ok(())
    }
}

/// Configuration for RiskManager using builder pattern
#[derive(Debug, Clone, PartialEq)]
pub struct RiskManagerConfig {
    /// Fraction of equity lost at the initial stop (0.03 = 3%)
    pub risk_pct: f64,
    pub partial_schedule: PartialSchedule,
    /// Notional cap as a multiple of equity
    pub max_leverage: f64,
    /// Share of the leverage cap actually used
    pub leverage_headroom: f64,
}

impl Default for RiskManagerConfig {
    fn default() -> Self {
        Self {
            risk_pct: 0.03,
            partial_schedule: PartialSchedule::default(),
            max_leverage: 100.0,
            leverage_headroom: 0.95,
        }
    }
}

impl RiskManagerConfig {
    /// Set risk per trade as a fraction (e.g., 0.03 = 3%)
    pub fn with_risk_pct(mut self, risk_pct: f64) -> Self {
        self.risk_pct = risk_pct;
        self
    }

    pub fn with_partial_schedule(mut self, schedule: PartialSchedule) -> Self {
        self.partial_schedule = schedule;
        self
    }

    pub fn with_leverage_cap(mut self, max_leverage: f64, headroom: f64) -> Self {
        self.max_leverage = max_leverage;
        self.leverage_headroom = headroom;
        self
    }

    pub fn build(self) -> RiskManager {
        RiskManager::from_config(self)
    }
}

/// A single rung of the R ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RTarget {
    pub r_multiple: f64,
    pub fraction: f64,
    pub price: f64,
}

/// Initial stop plus one target per scheduled partial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTargets {
    /// -1R price
    pub stop: f64,
    pub levels: Vec<RTarget>,
}

impl RTargets {
    /// Target price for an exact R-multiple on the ladder
    pub fn get(&self, r_multiple: f64) -> Option<f64> {
        self.levels
            .iter()
            .find(|t| t.r_multiple == r_multiple)
            .map(|t| t.price)
    }
}

/// Position sizer and R-ladder calculator
#[derive(Debug, Clone, PartialEq)]
pub struct RiskManager {
    pub risk_pct: f64,
    pub partial_schedule: PartialSchedule,
    pub max_leverage: f64,
    pub leverage_headroom: f64,
}

impl Default for RiskManager {
    fn default() -> Self {
        RiskManagerConfig::default().build()
    }
}

impl RiskManager {
    pub fn from_config(config: RiskManagerConfig) -> Self {
        RiskManager {
            risk_pct: config.risk_pct,
            partial_schedule: config.partial_schedule,
            max_leverage: config.max_leverage,
            leverage_headroom: config.leverage_headroom,
        }
    }

    /// Risk manager with the default schedule; `risk_per_trade_pct` is a
    /// percentage (3.0 = 3%).
    pub fn new(risk_per_trade_pct: f64) -> Self {
        RiskManagerConfig::default()
            .with_risk_pct(risk_per_trade_pct / 100.0)
            .build()
    }

    /// Size so that hitting the stop loses `risk_pct` of equity.
    /// Zero when the stop distance is not positive.
    pub fn position_size(&self, equity: f64, stop_distance: f64) -> f64 {
        if stop_distance.is_nan() || stop_distance <= 0.0 {
            return 0.0;
        }
        equity * self.risk_pct / stop_distance
    }

    /// Clamp a size so that its notional stays within the leverage cap
    pub fn cap_to_leverage(&self, size: f64, equity: f64, price: f64) -> f64 {
        if price.is_nan() || price <= 0.0 {
            return 0.0;
        }
        let max_size = equity * self.max_leverage / price * self.leverage_headroom;
        if size > max_size {
            tracing::warn!(
                size,
                max_size,
                price,
                "Position size capped by leverage limit"
            );
            max_size
        } else {
            size
        }
    }

    /// Initial stop and one target per scheduled partial
    pub fn r_targets(
        &self,
        entry_price: f64,
        stop_distance: f64,
        direction: Direction,
    ) -> RTargets {
        let sign = direction.sign();
        RTargets {
            stop: entry_price - sign * stop_distance,
            levels: self
                .partial_schedule
                .levels()
                .iter()
                .map(|level| RTarget {
                    r_multiple: level.r_multiple,
                    fraction: level.fraction,
                    price: entry_price + sign * stop_distance * level.r_multiple,
                })
                .collect(),
        }
    }

    /// Ratcheted stop after `partials_taken` partials:
    /// 0 → -1R, 1 → breakeven, 2 → +1R, 3+ → +2R.
    pub fn stop_for_level(
        &self,
        entry_price: f64,
        stop_distance: f64,
        partials_taken: u8,
        direction: Direction,
    ) -> f64 {
        let offset_r = match partials_taken {
            0 => -1.0,
            1 => 0.0,
            2 => 1.0,
            _ => 2.0,
        };
        entry_price + direction.sign() * stop_distance * offset_r
    }

    /// R-multiple of a move from entry to exit. Reporting only.
    pub fn r_multiple(
        &self,
        entry_price: f64,
        exit_price: f64,
        stop_distance: f64,
        direction: Direction,
    ) -> f64 {
        if stop_distance.is_nan() || stop_distance <= 0.0 {
            return 0.0;
        }
        direction.sign() * (exit_price - entry_price) / stop_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_sizing() {
        let rm = RiskManager::new(2.0);

        // Risk = 100,000 * 0.02 = 2,000
        // Stop distance = 5
        // Size = 2,000 / 5 = 400
        assert_eq!(rm.position_size(100_000.0, 5.0), 400.0);
    }

    #[test]
    fn test_position_sizing_zero_or_negative_stop() {
        let rm = RiskManager::new(3.0);
        assert_eq!(rm.position_size(10_000.0, 0.0), 0.0);
        assert_eq!(rm.position_size(10_000.0, -1.0), 0.0);
        assert_eq!(rm.position_size(10_000.0, f64::NAN), 0.0);
    }

    #[test]
    fn test_leverage_cap() {
        let rm = RiskManager::new(3.0);
        // 10k equity at 100x, price 50 -> 20,000 units, 95% headroom -> 19,000
        assert_relative_eq!(rm.cap_to_leverage(50_000.0, 10_000.0, 50.0), 19_000.0);
        assert_eq!(rm.cap_to_leverage(10.0, 10_000.0, 50.0), 10.0);
    }

    #[test]
    fn test_r_targets_long() {
        let rm = RiskManager::default();
        let t = rm.r_targets(101.0, 6.0, Direction::Long);
        assert_eq!(t.stop, 95.0);
        assert_eq!(t.get(1.0), Some(107.0));
        assert_eq!(t.get(2.0), Some(113.0));
        assert_eq!(t.get(3.0), Some(119.0));
        assert_eq!(t.get(4.0), None);
    }

    #[test]
    fn test_r_targets_short() {
        let rm = RiskManager::default();
        let t = rm.r_targets(100.0, 5.0, Direction::Short);
        assert_eq!(t.stop, 105.0);
        assert_eq!(t.get(1.0), Some(95.0));
        assert_eq!(t.get(3.0), Some(85.0));
    }

    #[test]
    fn test_stop_ratchet_table() {
        let rm = RiskManager::default();
        let long: Vec<f64> = (0..4)
            .map(|k| rm.stop_for_level(100.0, 5.0, k, Direction::Long))
            .collect();
        assert_eq!(long, vec![95.0, 100.0, 105.0, 110.0]);

        let short: Vec<f64> = (0..4)
            .map(|k| rm.stop_for_level(100.0, 5.0, k, Direction::Short))
            .collect();
        assert_eq!(short, vec![105.0, 100.0, 95.0, 90.0]);
    }

    #[test]
    fn test_r_multiple() {
        let rm = RiskManager::default();
        assert_eq!(rm.r_multiple(100.0, 95.0, 5.0, Direction::Long), -1.0);
        assert_eq!(rm.r_multiple(100.0, 90.0, 5.0, Direction::Short), 2.0);
        assert_eq!(rm.r_multiple(100.0, 90.0, 0.0, Direction::Short), 0.0);
    }

    #[test]
    fn test_schedule_validation() {
        assert!(PartialSchedule::default().validate().is_ok());
        assert_relative_eq!(PartialSchedule::default().runner_fraction(), 0.1, epsilon = 1e-12);

        assert!(PartialSchedule::new(vec![]).is_err());
        assert!(PartialSchedule::new(vec![
            PartialLevel::new(2.0, 0.3),
            PartialLevel::new(1.0, 0.3),
        ])
        .is_err());
        assert!(PartialSchedule::new(vec![
            PartialLevel::new(1.0, 0.6),
            PartialLevel::new(2.0, 0.6),
        ])
        .is_err());
        assert!(PartialSchedule::new(vec![
            PartialLevel::new(1.0, 0.25),
            PartialLevel::new(2.0, 0.25),
            PartialLevel::new(3.0, 0.25),
            PartialLevel::new(4.0, 0.25),
        ])
        .is_err());
    }

    /// Currency units must not change the size in base units
    #[test]
    fn test_currency_independence() {
        const USD_TO_INR: f64 = 85.0;
        let rm = RiskManager::new(3.0);

        let atr_usd = 3_000.0;
        let stop_distance_usd = atr_usd * 3.25;
        let size_usd = rm.position_size(100_000.0, stop_distance_usd);

        let stop_distance_inr = atr_usd * USD_TO_INR * 3.25;
        let size_inr = rm.position_size(100_000.0 * USD_TO_INR, stop_distance_inr);

        assert_relative_eq!(size_usd, size_inr, epsilon = 1e-9);
    }
}
