//! Single-position breakout engine
//!
//! Signal-cadence bars go to the entry detector; finer-cadence prices go to
//! the open position's exit state machine. The engine sizes entries, keeps at
//! most one position, and emits [`TradeIntent`]s for the caller's broker.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::breakout::EntrySignal;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::position::{ExitEvent, Position};
use crate::regime::RegimeClassifier;
use crate::risk::RiskManager;
use crate::strategy::{EntryDetector, SqueezeBreakoutDetector};
use crate::types::{ClosedTrade, IntentKind, TradeContext, TradeIntent};
use crate::Candle;

pub struct BreakoutEngine {
    config: EngineConfig,
    detector: Box<dyn EntryDetector>,
    risk: RiskManager,
    position: Option<Position>,
    trades: Vec<ClosedTrade>,
    last_context: Option<TradeContext>,
}

impl BreakoutEngine {
    /// Engine with the squeeze-breakout detector
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let detector = Box::new(SqueezeBreakoutDetector::new(&config));
        Self::with_detector(config, detector)
    }

    /// Engine with any entry detector; exits and sizing are shared
    pub fn with_detector(
        config: EngineConfig,
        detector: Box<dyn EntryDetector>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let risk = config.risk_manager();
        info!(
            "Engine ready: detector={}, warm-up={} bars",
            detector.name(),
            detector.min_history()
        );
        Ok(BreakoutEngine {
            config,
            detector,
            risk,
            position: None,
            trades: Vec::new(),
            last_context: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    pub fn detector(&self) -> &dyn EntryDetector {
        self.detector.as_ref()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    /// Closed trades, oldest first
    pub fn trades(&self) -> &[ClosedTrade] {
        &self.trades
    }

    /// Context recorded for the most recent entry
    pub fn last_context(&self) -> Option<&TradeContext> {
        self.last_context.as_ref()
    }

    /// Process one closed signal bar.
    ///
    /// The detector always sees the bar. A signal that arrives while a
    /// position is open is dropped.
    pub fn on_signal_bar(
        &mut self,
        bar: &Candle,
        equity: f64,
        regime: &dyn RegimeClassifier,
    ) -> EngineResult<Option<TradeIntent>> {
        let signal = match self.detector.on_bar(bar, regime)? {
            Some(signal) => signal,
            None => return Ok(None),
        };

        if self.position.is_some() {
            debug!(
                time = %signal.time,
                direction = %signal.direction,
                "Breakout ignored, position already open"
            );
            return Ok(None);
        }

        self.enter(&signal, equity).map(Some)
    }

    /// Size and open a position for `signal`
    pub fn enter(&mut self, signal: &EntrySignal, equity: f64) -> EngineResult<TradeIntent> {
        if self.position.is_some() {
            return Err(EngineError::PositionOpen);
        }

        let mult = self
            .config
            .effective_atr_mult(signal.direction, signal.volatility);
        let stop_distance = signal.atr * mult;

        let size = self.risk.position_size(equity, stop_distance);
        let size = self.risk.cap_to_leverage(size, equity, signal.price);
        if size <= 0.0 {
            return Err(EngineError::ZeroStopDistance(stop_distance));
        }

        let context = TradeContext {
            atr: signal.atr,
            stop_distance,
            risk_pct: self.config.risk_per_trade_pct,
            position_size: size,
            direction: signal.direction,
            pattern: signal.pattern.clone(),
            squeeze_bars: signal.squeeze_bars,
            volatility: signal.volatility,
        };

        let position = Position::open(signal, mult, size, &self.risk, context.clone())?
            .with_fill_model(self.config.fill_model);

        info!(
            "{} {} ENTRY: Price={:.2}, Size={:.6}, Stop={:.2}, 1R={:.2}, Squeeze={} bars",
            signal.time.format("%Y-%m-%d %H:%M"),
            signal.direction,
            signal.price,
            size,
            position.current_stop,
            stop_distance,
            signal.squeeze_bars
        );

        self.position = Some(position);
        self.last_context = Some(context);

        Ok(TradeIntent {
            time: signal.time,
            direction: signal.direction,
            side: signal.direction.entry_side(),
            price: signal.price,
            size,
            kind: IntentKind::Entry,
        })
    }

    /// Feed one finer-cadence price to the open position, if any
    pub fn on_price(&mut self, time: DateTime<Utc>, price: f64) -> Option<TradeIntent> {
        let position = self.position.as_mut()?;
        let direction = position.direction;
        let remaining = position.remaining_size;

        match position.on_price(time, price, &self.risk) {
            ExitEvent::Hold => None,
            ExitEvent::Partial {
                level,
                price,
                size,
                r_multiple,
                new_stop,
            } => {
                info!(
                    "{} {} PARTIAL {}: Price={:.2}, Size={:.6}, R={:.2}, Stop->{:.2}",
                    time.format("%Y-%m-%d %H:%M"),
                    direction,
                    level,
                    price,
                    size,
                    r_multiple,
                    new_stop
                );
                Some(TradeIntent {
                    time,
                    direction,
                    side: direction.exit_side(),
                    price,
                    size,
                    kind: IntentKind::Partial(level),
                })
            }
            ExitEvent::Closed(trade) => Some(self.finish(*trade, remaining)),
        }
    }

    /// Close the open position at `price` regardless of stops.
    ///
    /// A non-finite or non-positive price closes nothing.
    pub fn force_close(&mut self, time: DateTime<Utc>, price: f64) -> Option<TradeIntent> {
        if !price.is_finite() || price <= 0.0 {
            warn!(price, "Refusing to force close at a malformed price");
            return None;
        }
        let position = self.position.as_mut()?;
        let remaining = position.remaining_size;
        let trade = position.force_close(time, price, &self.risk);
        Some(self.finish(trade, remaining))
    }

    fn finish(&mut self, trade: ClosedTrade, size: f64) -> TradeIntent {
        info!(
            "{} {} EXIT [{}]: Price={:.2}, R={:.2}, Realized R={:.2}, MFE={:.2}R",
            trade.exit_time.format("%Y-%m-%d %H:%M"),
            trade.direction,
            trade.reason,
            trade.exit_price,
            trade.r_multiple,
            trade.realized_r,
            trade.mfe_r
        );

        let intent = TradeIntent {
            time: trade.exit_time,
            direction: trade.direction,
            side: trade.direction.exit_side(),
            price: trade.exit_price,
            size,
            kind: IntentKind::Exit(trade.reason),
        };
        self.position = None;
        self.trades.push(trade);
        intent
    }

    /// Drop all state, including closed trades
    pub fn reset(&mut self) {
        self.detector.reset();
        self.position = None;
        self.trades.clear();
        self.last_context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::VolatilityRegime;
    use crate::types::{Direction, ExitReason, Side};
    use chrono::TimeZone;

    fn signal(
        direction: Direction,
        price: f64,
        atr: f64,
        vol: Option<VolatilityRegime>,
    ) -> EntrySignal {
        EntrySignal {
            time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            direction,
            price,
            atr,
            volatility: vol,
            squeeze_bars: 7,
            pattern: None,
        }
    }

    #[test]
    fn test_enter_sizes_by_risk() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        let high_vol = Some(VolatilityRegime::HighVol);
        let intent = engine
            .enter(&signal(Direction::Long, 100.0, 2.0, high_vol), 10_000.0)
            .unwrap();
        // d = 2 * 3.25 = 6.5, size = 300 / 6.5
        assert_eq!(intent.side, Side::Buy);
        assert!((intent.size - 300.0 / 6.5).abs() < 1e-9);
        let ctx = engine.last_context().unwrap();
        assert_eq!(ctx.stop_distance, 6.5);
        assert_eq!(ctx.squeeze_bars, 7);
        assert_eq!(ctx.risk_pct, 3.0);
    }

    #[test]
    fn test_normal_vol_tightens_stop() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        let normal_vol = Some(VolatilityRegime::NormalVol);
        engine
            .enter(&signal(Direction::Short, 100.0, 1.0, normal_vol), 10_000.0)
            .unwrap();
        let pos = engine.position().unwrap();
        assert_eq!(pos.effective_atr_mult, 6.0);
        assert_eq!(pos.current_stop, 106.0);
    }

    #[test]
    fn test_second_entry_refused() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        let s = signal(Direction::Long, 100.0, 2.0, None);
        engine.enter(&s, 10_000.0).unwrap();
        assert_eq!(engine.enter(&s, 10_000.0).unwrap_err(), EngineError::PositionOpen);
    }

    #[test]
    fn test_zero_atr_is_skipped() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        let err = engine
            .enter(&signal(Direction::Long, 100.0, 0.0, None), 10_000.0)
            .unwrap_err();
        assert!(matches!(err, EngineError::ZeroStopDistance(_)));
        assert!(engine.is_flat());
    }

    #[test]
    fn test_force_close_records_trade() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        engine
            .enter(&signal(Direction::Long, 100.0, 2.0, None), 10_000.0)
            .unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let intent = engine.force_close(t, 103.25).unwrap();
        assert_eq!(intent.kind, IntentKind::Exit(ExitReason::ForceClosed));
        assert_eq!(intent.side, Side::Sell);
        assert!(engine.is_flat());
        assert_eq!(engine.trades().len(), 1);
        assert_eq!(engine.trades()[0].r_multiple, 0.5);
        assert!(engine.force_close(t, 100.0).is_none());
    }

    #[test]
    fn test_force_close_ignores_malformed_price() {
        let mut engine = BreakoutEngine::new(EngineConfig::default()).unwrap();
        engine
            .enter(&signal(Direction::Short, 100.0, 2.0, None), 10_000.0)
            .unwrap();
        let t = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        assert!(engine.force_close(t, f64::NAN).is_none());
        assert!(engine.force_close(t, 0.0).is_none());
        assert!(engine.force_close(t, -5.0).is_none());
        assert!(!engine.is_flat());
        assert!(engine.trades().is_empty());

        let intent = engine.force_close(t, 96.0).unwrap();
        assert_eq!(intent.side, Side::Buy);
        assert!(engine.trades()[0].r_multiple.is_finite());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EngineConfig::default().with_atr_period(0);
        assert!(BreakoutEngine::new(config).is_err());
    }
}
