//! Market regime interface
//!
//! The classifier itself lives outside this crate. The engine only polls it,
//! once per squeeze end, and treats a fault as "regime unknown".

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendRegime {
    Uptrend,
    Downtrend,
    Ranging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    HighVol,
    NormalVol,
    LowVol,
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VolatilityRegime::HighVol => "high_vol",
            VolatilityRegime::NormalVol => "normal_vol",
            VolatilityRegime::LowVol => "low_vol",
        };
        write!(f, "{}", s)
    }
}

/// One classifier reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeInfo {
    pub trend: TrendRegime,
    pub volatility: VolatilityRegime,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegimeError {
    #[error("regime classifier not ready: {0}")]
    NotReady(String),

    #[error("regime classifier failed: {0}")]
    Failed(String),
}

/// Read-only trend/volatility classifier
pub trait RegimeClassifier {
    fn classify(&self) -> Result<RegimeInfo, RegimeError>;
}

/// Classifier that always reports the same regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedRegime(pub RegimeInfo);

impl FixedRegime {
    pub fn new(trend: TrendRegime, volatility: VolatilityRegime) -> Self {
        FixedRegime(RegimeInfo { trend, volatility })
    }

    pub fn volatility(volatility: VolatilityRegime) -> Self {
        Self::new(TrendRegime::Ranging, volatility)
    }
}

impl Default for FixedRegime {
    fn default() -> Self {
        Self::volatility(VolatilityRegime::HighVol)
    }
}

impl RegimeClassifier for FixedRegime {
    fn classify(&self) -> Result<RegimeInfo, RegimeError> {
        Ok(self.0)
    }
}

impl<T: RegimeClassifier + ?Sized> RegimeClassifier for &T {
    fn classify(&self) -> Result<RegimeInfo, RegimeError> {
        (**self).classify()
    }
}
