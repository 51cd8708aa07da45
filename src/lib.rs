//! Squeeze Breakout
//!
//! Volatility-squeeze breakout engine: Wilder ATR, ATR percentile rank,
//! squeeze range tracking, breakout signals filtered by a market regime,
//! R-multiple position sizing and a partial-exit state machine with a
//! ratcheting stop and ATR trail. Includes an offline replay and a
//! two-cadence backtest driver.

pub mod backtest;
pub mod breakout;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod position;
pub mod regime;
pub mod replay;
pub mod risk;
pub mod squeeze;
pub mod strategy;
pub mod types;

pub use config::{BacktestConfig, Config, DataConfig, EngineConfig};
pub use engine::BreakoutEngine;
pub use error::{EngineError, EngineResult};
pub use types::*;
