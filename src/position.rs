//! Position exit state machine
//!
//! `FLAT → OPEN(0) → OPEN(1) → OPEN(2) → OPEN(3, runner) → FLAT`
//!
//! A [`Position`] owns every field the exit logic needs and is created in one
//! step, so there is no half-initialized state to guard against. Each call to
//! [`Position::on_price`] performs at most one transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::breakout::EntrySignal;
use crate::error::{EngineError, EngineResult};
use crate::risk::{RTargets, RiskManager};
use crate::types::{ClosedTrade, Direction, ExitReason, TradeContext};

/// Price at which triggered partials and stops are assumed to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillModel {
    /// Resting orders: partials fill at their target, stops at the stop level
    #[default]
    AtLevel,
    /// Market-on-touch: everything fills at the observed update price
    AtPrice,
}

/// Outcome of one finer-cadence update
#[derive(Debug, Clone, PartialEq)]
pub enum ExitEvent {
    Hold,
    Partial {
        /// 1-based level just taken
        level: u8,
        price: f64,
        size: f64,
        r_multiple: f64,
        new_stop: f64,
    },
    Closed(Box<ClosedTrade>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_atr: f64,
    pub effective_atr_mult: f64,
    /// 1R in price units
    pub stop_distance: f64,
    pub r_targets: RTargets,
    /// Ratchet floor; only ever tightens
    pub current_stop: f64,
    pub partials_taken: u8,
    pub initial_size: f64,
    pub remaining_size: f64,
    /// High-water mark for longs, low-water mark for shorts
    pub watermark: f64,
    pub fill_model: FillModel,
    pub context: TradeContext,
    /// Σ (fill R × fill size) over partial fills so far
    realized_r_size: f64,
    updates: usize,
}

impl Position {
    /// Open a position from an entry signal.
    ///
    /// `stop_distance = signal.atr * effective_atr_mult`; both it and `size`
    /// must be positive.
    pub fn open(
        signal: &EntrySignal,
        effective_atr_mult: f64,
        size: f64,
        risk: &RiskManager,
        context: TradeContext,
    ) -> EngineResult<Self> {
        let stop_distance = signal.atr * effective_atr_mult;
        if !stop_distance.is_finite() || stop_distance <= 0.0 {
            return Err(EngineError::ZeroStopDistance(stop_distance));
        }
        if !size.is_finite() || size <= 0.0 {
            return Err(EngineError::InvalidSize(size));
        }

        let r_targets = risk.r_targets(signal.price, stop_distance, signal.direction);
        let current_stop = r_targets.stop;

        Ok(Position {
            direction: signal.direction,
            entry_time: signal.time,
            entry_price: signal.price,
            entry_atr: signal.atr,
            effective_atr_mult,
            stop_distance,
            r_targets,
            current_stop,
            partials_taken: 0,
            initial_size: size,
            remaining_size: size,
            watermark: signal.price,
            fill_model: FillModel::default(),
            context,
            realized_r_size: 0.0,
            updates: 0,
        })
    }

    pub fn with_fill_model(mut self, fill_model: FillModel) -> Self {
        self.fill_model = fill_model;
        self
    }

    /// Distance of the runner trail behind the watermark
    pub fn trail_distance(&self) -> f64 {
        self.entry_atr * self.effective_atr_mult
    }

    /// Stop in force for the next update: the ratchet alone before the first
    /// partial, afterwards the tighter of ratchet and ATR trail.
    pub fn effective_stop(&self) -> f64 {
        if self.partials_taken == 0 {
            return self.current_stop;
        }
        let trail = self.watermark - self.direction.sign() * self.trail_distance();
        match self.direction {
            Direction::Long => self.current_stop.max(trail),
            Direction::Short => self.current_stop.min(trail),
        }
    }

    /// Best favorable excursion so far, in R
    pub fn mfe_r(&self) -> f64 {
        (self.direction.sign() * (self.watermark - self.entry_price) / self.stop_distance).max(0.0)
    }

    /// Process one finer-cadence price.
    ///
    /// Non-finite or non-positive prices are ignored without touching state.
    pub fn on_price(&mut self, time: DateTime<Utc>, price: f64, risk: &RiskManager) -> ExitEvent {
        if !price.is_finite() || price <= 0.0 {
            tracing::debug!(price, "Ignoring malformed price update");
            return ExitEvent::Hold;
        }

        self.updates += 1;
        let sign = self.direction.sign();

        if sign * (price - self.watermark) > 0.0 {
            self.watermark = price;
        }

        if let Some(event) = self.try_partial(time, price, risk) {
            return event;
        }

        let effective_stop = self.effective_stop();
        if sign * (price - effective_stop) <= 0.0 {
            let fill = match self.fill_model {
                FillModel::AtLevel => effective_stop,
                FillModel::AtPrice => price,
            };
            let reason = if self.partials_taken == 0 {
                ExitReason::InitialStop
            } else if usize::from(self.partials_taken) >= self.r_targets.levels.len() {
                ExitReason::RunnerTrail
            } else {
                ExitReason::AtrTrail {
                    after: self.partials_taken,
                }
            };
            return ExitEvent::Closed(Box::new(self.close(time, fill, reason, risk)));
        }

        ExitEvent::Hold
    }

    fn try_partial(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        risk: &RiskManager,
    ) -> Option<ExitEvent> {
        let sign = self.direction.sign();

        for (i, target) in self.r_targets.levels.iter().enumerate() {
            if usize::from(self.partials_taken) > i {
                continue;
            }
            if sign * (price - target.price) < 0.0 {
                continue;
            }

            let size = (self.initial_size * target.fraction).min(self.remaining_size);
            if size <= 0.0 {
                continue;
            }

            let fill = match self.fill_model {
                FillModel::AtLevel => target.price,
                FillModel::AtPrice => price,
            };
            let r_multiple =
                risk.r_multiple(self.entry_price, fill, self.stop_distance, self.direction);

            // `i` is bounded by MAX_PARTIALS
            self.partials_taken = (i + 1) as u8;
            self.current_stop = risk.stop_for_level(
                self.entry_price,
                self.stop_distance,
                self.partials_taken,
                self.direction,
            );
            self.remaining_size -= size;
            self.realized_r_size += r_multiple * size;

            if self.remaining_size <= self.initial_size * 1e-12 {
                // Schedule fractions summed to 1: the last partial is the exit.
                self.remaining_size = size;
                self.realized_r_size -= r_multiple * size;
                return Some(ExitEvent::Closed(Box::new(self.close(
                    time,
                    fill,
                    ExitReason::ScheduleComplete,
                    risk,
                ))));
            }

            return Some(ExitEvent::Partial {
                level: self.partials_taken,
                price: fill,
                size,
                r_multiple,
                new_stop: self.current_stop,
            });
        }

        None
    }

    /// Close the remaining size at `price` from outside the state machine
    pub fn force_close(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        risk: &RiskManager,
    ) -> ClosedTrade {
        self.close(time, price, ExitReason::ForceClosed, risk)
    }

    fn close(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        reason: ExitReason,
        risk: &RiskManager,
    ) -> ClosedTrade {
        let r_multiple =
            risk.r_multiple(self.entry_price, price, self.stop_distance, self.direction);
        self.realized_r_size += r_multiple * self.remaining_size;
        self.remaining_size = 0.0;

        ClosedTrade {
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time: time,
            entry_price: self.entry_price,
            exit_price: price,
            initial_size: self.initial_size,
            partials_taken: self.partials_taken,
            r_multiple,
            realized_r: self.realized_r_size / self.initial_size,
            mfe_r: self.mfe_r(),
            reason,
            updates_held: self.updates,
            context: self.context.clone(),
        }
    }
}
