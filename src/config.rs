//! Configuration management
//!
//! Loads the engine, backtest and data settings from a JSON file. Every field
//! has a default, so `{}` is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::position::FillModel;
use crate::regime::VolatilityRegime;
use crate::risk::{PartialSchedule, RiskManager, RiskManagerConfig};
use crate::types::{BarLabel, Direction};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub backtest: BacktestConfig,
    pub data: DataConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }
}

/// Squeeze-breakout engine parameters.
///
/// Immutable once the engine is built; there is no global parameter store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trailing window for the ATR percentile rank, in signal bars
    pub lookback: usize,
    /// Rank (0-100) below which a bar counts as squeezed
    pub squeeze_pctile: f64,
    pub atr_period: usize,
    pub atr_mult_long: f64,
    pub atr_mult_short: f64,
    /// Percent of equity lost at the initial stop (3.0 = 3%)
    pub risk_per_trade_pct: f64,
    pub partial_schedule: PartialSchedule,
    /// Multiplier applied to the ATR multiple in a `normal_vol` regime
    pub normal_vol_mult_scale: f64,
    pub max_leverage: f64,
    pub leverage_headroom: f64,
    pub fill_model: FillModel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            lookback: 102,
            squeeze_pctile: 25.0,
            atr_period: 14,
            atr_mult_long: 3.25,
            atr_mult_short: 8.0,
            risk_per_trade_pct: 3.0,
            partial_schedule: PartialSchedule::default(),
            normal_vol_mult_scale: 0.75,
            max_leverage: 100.0,
            leverage_headroom: 0.95,
            fill_model: FillModel::AtLevel,
        }
    }
}

impl EngineConfig {
    /// Signal bars required before the first entry evaluation
    pub fn min_history(&self) -> usize {
        self.atr_period + self.lookback + 2
    }

    /// Base ATR multiple for a direction, before regime scaling
    pub fn atr_mult(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.atr_mult_long,
            Direction::Short => self.atr_mult_short,
        }
    }

    /// ATR multiple after regime scaling. An unknown regime counts as high_vol.
    pub fn effective_atr_mult(
        &self,
        direction: Direction,
        volatility: Option<VolatilityRegime>,
    ) -> f64 {
        let scale = match volatility {
            Some(VolatilityRegime::NormalVol) => self.normal_vol_mult_scale,
            _ => 1.0,
        };
        self.atr_mult(direction) * scale
    }

    pub fn validate(&self) -> EngineResult<()> {
        fn positive(name: &str, value: f64) -> EngineResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )))
            }
        }

        if self.atr_period == 0 {
            return Err(EngineError::InvalidConfig("atr_period must be >= 1".to_string()));
        }
        if self.lookback == 0 {
            return Err(EngineError::InvalidConfig("lookback must be >= 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.squeeze_pctile) {
            return Err(EngineError::InvalidConfig(format!(
                "squeeze_pctile must be within [0, 100], got {}",
                self.squeeze_pctile
            )));
        }
        positive("atr_mult_long", self.atr_mult_long)?;
        positive("atr_mult_short", self.atr_mult_short)?;
        positive("risk_per_trade_pct", self.risk_per_trade_pct)?;
        positive("normal_vol_mult_scale", self.normal_vol_mult_scale)?;
        positive("max_leverage", self.max_leverage)?;
        positive("leverage_headroom", self.leverage_headroom)?;
        if self.risk_per_trade_pct > 100.0 {
            return Err(EngineError::InvalidConfig(format!(
                "risk_per_trade_pct is a percent, got {}",
                self.risk_per_trade_pct
            )));
        }
        if self.leverage_headroom > 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "leverage_headroom must be <= 1.0, got {}",
                self.leverage_headroom
            )));
        }
        self.partial_schedule.validate()
    }

    pub fn risk_manager_config(&self) -> RiskManagerConfig {
        RiskManagerConfig::default()
            .with_risk_pct(self.risk_per_trade_pct / 100.0)
            .with_partial_schedule(self.partial_schedule.clone())
            .with_leverage_cap(self.max_leverage, self.leverage_headroom)
    }

    pub fn risk_manager(&self) -> RiskManager {
        self.risk_manager_config().build()
    }

    pub fn with_lookback(mut self, lookback: usize) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_squeeze_pctile(mut self, squeeze_pctile: f64) -> Self {
        self.squeeze_pctile = squeeze_pctile;
        self
    }

    pub fn with_atr_period(mut self, atr_period: usize) -> Self {
        self.atr_period = atr_period;
        self
    }

    pub fn with_atr_mults(mut self, long: f64, short: f64) -> Self {
        self.atr_mult_long = long;
        self.atr_mult_short = short;
        self
    }

    pub fn with_risk_per_trade_pct(mut self, pct: f64) -> Self {
        self.risk_per_trade_pct = pct;
        self
    }

    pub fn with_partial_schedule(mut self, schedule: PartialSchedule) -> Self {
        self.partial_schedule = schedule;
        self
    }

    pub fn with_fill_model(mut self, fill_model: FillModel) -> Self {
        self.fill_model = fill_model;
        self
    }
}

/// Backtest driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Starting equity, same currency as the price data
    pub initial_capital: f64,
    /// Volatility label reported by the fixed regime classifier
    pub volatility: VolatilityRegime,
    /// Force-close an open position at the last finer price
    pub close_at_end: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            volatility: VolatilityRegime::HighVol,
            close_at_end: true,
        }
    }
}

/// Input data settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Time each CSV row is stamped with; applies to both cadences
    pub bar_label: BarLabel,
}
