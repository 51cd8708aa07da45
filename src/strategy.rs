//! Entry detector framework
//!
//! Defines the [`EntryDetector`] trait shared by every entry pattern and the
//! squeeze-breakout detector built from the ATR, squeeze and breakout parts.
//! Sizing and exits are not a detector's concern; the engine handles those
//! for whichever detector it is given.

use std::collections::VecDeque;

use tracing::debug;

use crate::breakout::{BreakoutTrigger, EntrySignal};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::indicators::{percentile_rank, WilderAtr};
use crate::regime::RegimeClassifier;
use crate::squeeze::{SqueezeState, SqueezeTracker, SqueezeUpdate};
use crate::Candle;

/// Signal-cadence entry detector
pub trait EntryDetector {
    fn name(&self) -> &str;

    /// Signal bars needed before the first evaluation
    fn min_history(&self) -> usize;

    /// Feed one closed signal bar.
    ///
    /// Called on every bar, including while a position is open, so internal
    /// state never skips bars. Returns `InsufficientHistory` during warm-up.
    fn on_bar(
        &mut self,
        bar: &Candle,
        regime: &dyn RegimeClassifier,
    ) -> EngineResult<Option<EntrySignal>>;

    fn reset(&mut self);
}

/// ATR squeeze → range breakout detector
#[derive(Debug, Clone)]
pub struct SqueezeBreakoutDetector {
    lookback: usize,
    min_history: usize,
    atr: WilderAtr,
    /// Up to `lookback` ATR values preceding the current bar
    history: VecDeque<Option<f64>>,
    bars_seen: usize,
    last_rank: Option<f64>,
    tracker: SqueezeTracker,
    trigger: BreakoutTrigger,
}

impl SqueezeBreakoutDetector {
    pub fn new(config: &EngineConfig) -> Self {
        SqueezeBreakoutDetector {
            lookback: config.lookback,
            min_history: config.min_history(),
            atr: WilderAtr::new(config.atr_period),
            history: VecDeque::with_capacity(config.lookback + 1),
            bars_seen: 0,
            last_rank: None,
            tracker: SqueezeTracker::new(config.squeeze_pctile),
            trigger: BreakoutTrigger::new(),
        }
    }

    pub fn squeeze_state(&self) -> &SqueezeState {
        self.tracker.state()
    }

    /// ATR of the most recent bar
    pub fn atr(&self) -> Option<f64> {
        self.atr.value()
    }

    /// Percentile rank of the most recent bar
    pub fn last_rank(&self) -> Option<f64> {
        self.last_rank
    }

    pub fn bars_seen(&self) -> usize {
        self.bars_seen
    }
}

impl EntryDetector for SqueezeBreakoutDetector {
    fn name(&self) -> &str {
        "squeeze_breakout"
    }

    fn min_history(&self) -> usize {
        self.min_history
    }

    fn on_bar(
        &mut self,
        bar: &Candle,
        regime: &dyn RegimeClassifier,
    ) -> EngineResult<Option<EntrySignal>> {
        bar.validate()?;

        let atr = self.atr.next(bar.high, bar.low, bar.close);
        self.bars_seen += 1;

        // Rank against the bars before this one, then make this bar history.
        let rank = percentile_rank(self.history.iter().copied(), atr, self.lookback);
        self.last_rank = Some(rank);
        self.history.push_back(atr);
        while self.history.len() > self.lookback {
            self.history.pop_front();
        }

        if self.bars_seen < self.min_history {
            return Err(EngineError::InsufficientHistory {
                have: self.bars_seen,
                need: self.min_history,
            });
        }

        let update = self
            .tracker
            .update(bar, rank, atr.unwrap_or(f64::NAN))?;

        let end = match update {
            SqueezeUpdate::Ended(end) => end,
            SqueezeUpdate::Squeezing { bars, .. } => {
                if bars == 1 {
                    debug!(time = %bar.datetime, rank, "Squeeze started");
                }
                return Ok(None);
            }
            SqueezeUpdate::Idle => return Ok(None),
        };

        match self.trigger.evaluate(&end, regime) {
            Ok(signal) => Ok(Some(signal)),
            Err(rejection) => {
                debug!(
                    time = %end.time,
                    squeeze_bars = end.bars,
                    reason = %rejection,
                    "Squeeze ended without entry"
                );
                Ok(None)
            }
        }
    }

    fn reset(&mut self) {
        self.atr.reset();
        self.history.clear();
        self.bars_seen = 0;
        self.last_rank = None;
        self.tracker.reset();
    }
}
