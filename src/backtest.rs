//! Backtesting driver
//!
//! Nests the finer execution stream inside the signal stream. For every
//! execution bar the open position sees the price first; signal bars that
//! closed at or before that bar are evaluated after, so exits on a timestamp
//! always precede entries on it. Fills are assumed at the requested price.
//!
//! Nesting compares close times. Open-labeled streams (`data.bar_label`) are
//! restamped to close time first; otherwise an hourly bar stamped 14:00 would
//! be acted on at the 14:00 execution bar, before its close exists.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::{ensure_monotonic, to_close_labels};
use crate::engine::BreakoutEngine;
use crate::error::EngineError;
use crate::regime::RegimeClassifier;
use crate::types::{ClosedTrade, IntentKind, Money, TradeIntent};
use crate::Candle;

/// Backtest engine
pub struct Backtester {
    config: Config,
    engine: BreakoutEngine,
}

impl Backtester {
    pub fn new(config: Config) -> Result<Self> {
        let engine = BreakoutEngine::new(config.engine.clone())?;
        Ok(Backtester { config, engine })
    }

    pub fn engine(&self) -> &BreakoutEngine {
        &self.engine
    }

    /// Run over a signal series and the finer execution series nested in it
    pub fn run(
        &mut self,
        signal_bars: &[Candle],
        exec_bars: &[Candle],
        regime: &dyn RegimeClassifier,
    ) -> Result<BacktestResult> {
        ensure_monotonic(signal_bars)?;
        ensure_monotonic(exec_bars)?;

        let label = self.config.data.bar_label;
        let signal_closed = to_close_labels(signal_bars, label)?;
        let exec_closed = to_close_labels(exec_bars, label)?;
        let (signal_bars, exec_bars) = (&*signal_closed, &*exec_closed);

        let initial = Money::from_f64(self.config.backtest.initial_capital);
        let mut equity = initial;
        let mut intents = Vec::new();
        let mut equity_curve = Vec::with_capacity(exec_bars.len());
        let mut next_signal = 0;

        info!(
            "Backtest: {} signal bars, {} execution bars, capital {}",
            signal_bars.len(),
            exec_bars.len(),
            initial
        );

        for exec in exec_bars {
            if let Some(intent) = self.step_price(exec.datetime, exec.close, &mut equity) {
                intents.push(intent);
            }

            while next_signal < signal_bars.len()
                && signal_bars[next_signal].datetime <= exec.datetime
            {
                let bar = &signal_bars[next_signal];
                next_signal += 1;

                match self.engine.on_signal_bar(bar, equity.to_f64(), regime) {
                    Ok(Some(intent)) => intents.push(intent),
                    Ok(None) => {}
                    Err(EngineError::InsufficientHistory { .. }) => {}
                    Err(e @ EngineError::MalformedBar(_)) => {
                        warn!(time = %bar.datetime, error = %e, "Skipping signal bar");
                    }
                    Err(e) => {
                        debug!(time = %bar.datetime, error = %e, "Signal bar produced no entry");
                    }
                }
            }

            equity_curve.push((exec.datetime, self.mark_to_market(equity, exec.close)));
        }

        if next_signal < signal_bars.len() {
            debug!(
                "{} signal bars after the last execution bar were not evaluated",
                signal_bars.len() - next_signal
            );
        }

        if self.config.backtest.close_at_end {
            if let Some(last) = exec_bars.last() {
                if let Some(entry_price) = self.engine.position().map(|p| p.entry_price) {
                    if let Some(intent) = self.engine.force_close(last.datetime, last.close) {
                        equity += Money::from_f64(fill_pnl(&intent, entry_price));
                        intents.push(intent);
                        if let Some(point) = equity_curve.last_mut() {
                            point.1 = equity.to_f64();
                        }
                    }
                }
            }
        }

        let trades = self.engine.trades().to_vec();
        let summary = BacktestSummary::calculate(&trades, initial, equity, &equity_curve);

        info!(
            "Backtest complete: {} trades, win rate {:.1}%, total R {:.2}, final equity {}",
            summary.total_trades, summary.win_rate, summary.total_r, equity
        );

        Ok(BacktestResult {
            trades,
            intents,
            equity_curve,
            final_equity: equity,
            summary,
        })
    }

    fn step_price(
        &mut self,
        time: DateTime<Utc>,
        price: f64,
        equity: &mut Money,
    ) -> Option<TradeIntent> {
        let entry_price = self.engine.position()?.entry_price;
        let intent = self.engine.on_price(time, price)?;
        *equity += Money::from_f64(fill_pnl(&intent, entry_price));
        Some(intent)
    }

    fn mark_to_market(&self, equity: Money, price: f64) -> f64 {
        let open_pnl = self
            .engine
            .position()
            .map(|p| p.direction.sign() * (price - p.entry_price) * p.remaining_size)
            .unwrap_or(0.0);
        equity.to_f64() + open_pnl
    }
}

/// Realized PnL of a reducing fill
fn fill_pnl(intent: &TradeIntent, entry_price: f64) -> f64 {
    match intent.kind {
        IntentKind::Entry => 0.0,
        IntentKind::Partial(_) | IntentKind::Exit(_) => {
            intent.direction.sign() * (intent.price - entry_price) * intent.size
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub mean_r: f64,
    pub total_r: f64,
    pub best_r: f64,
    pub worst_r: f64,
    pub initial_capital: Money,
    pub final_equity: Money,
    pub total_return_pct: f64,
    /// Peak-to-trough of the marked equity curve, percent
    pub max_drawdown_pct: f64,
}

impl BacktestSummary {
    pub fn calculate(
        trades: &[ClosedTrade],
        initial_capital: Money,
        final_equity: Money,
        equity_curve: &[(DateTime<Utc>, f64)],
    ) -> Self {
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        let total_r: f64 = trades.iter().map(|t| t.realized_r).sum();

        let (win_rate, mean_r) = if trades.is_empty() {
            (0.0, 0.0)
        } else {
            (
                winning_trades as f64 / trades.len() as f64 * 100.0,
                total_r / trades.len() as f64,
            )
        };

        let best_r = trades.iter().map(|t| t.realized_r).fold(0.0, f64::max);
        let worst_r = trades.iter().map(|t| t.realized_r).fold(0.0, f64::min);

        let initial = initial_capital.to_f64();
        let total_return_pct = if initial > 0.0 {
            (final_equity.to_f64() - initial) / initial * 100.0
        } else {
            0.0
        };

        let mut peak = initial;
        let mut max_dd = 0.0;
        for &(_, equity) in equity_curve {
            if equity > peak {
                peak = equity;
            }
            if peak > 0.0 {
                let dd = (peak - equity) / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }

        BacktestSummary {
            total_trades: trades.len(),
            winning_trades,
            losing_trades: trades.len() - winning_trades,
            win_rate,
            mean_r,
            total_r,
            best_r,
            worst_r,
            initial_capital,
            final_equity,
            total_return_pct,
            max_drawdown_pct: max_dd * 100.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BacktestResult {
    pub trades: Vec<ClosedTrade>,
    pub intents: Vec<TradeIntent>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
    pub final_equity: Money,
    pub summary: BacktestSummary,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;
    use chrono::TimeZone;

    #[test]
    fn test_summary_of_no_trades() {
        let initial = Money::from_f64(10_000.0);
        let summary = BacktestSummary::calculate(&[], initial, initial, &[]);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.total_return_pct, 0.0);
        assert_eq!(summary.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_drawdown_from_equity_curve() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let curve = vec![(t, 10_000.0), (t, 12_000.0), (t, 9_000.0), (t, 11_000.0)];
        let summary = BacktestSummary::calculate(
            &[],
            Money::from_f64(10_000.0),
            Money::from_f64(11_000.0),
            &curve,
        );
        assert!((summary.max_drawdown_pct - 25.0).abs() < 1e-9);
        assert!((summary.total_return_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_fill_pnl_short() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let intent = TradeIntent {
            time: t,
            direction: Direction::Short,
            side: Direction::Short.exit_side(),
            price: 95.0,
            size: 2.0,
            kind: IntentKind::Partial(1),
        };
        assert_eq!(fill_pnl(&intent, 100.0), 10.0);
    }

    #[test]
    fn test_rejects_unordered_exec_stream() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bar = Candle::new_unchecked(t, 100.0, 101.0, 99.0, 100.0, 1.0);
        let mut bt = Backtester::new(Config::default()).unwrap();
        let regime = crate::regime::FixedRegime::default();
        assert!(bt.run(&[], &[bar.clone(), bar], &regime).is_err());
    }
}
