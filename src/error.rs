//! Engine error types
//!
//! Every variant is an expected condition that skips one evaluation step.
//! None of them leave partially mutated state behind.

use thiserror::Error;

use crate::types::CandleValidationError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Not enough signal bars yet for ATR seeding plus a full rank lookback
    #[error("insufficient history: have {have} bars, need {need}")]
    InsufficientHistory { have: usize, need: usize },

    #[error("invalid ATR: {0}")]
    InvalidAtr(f64),

    /// Sizer produced no position for this stop distance
    #[error("stop distance {0} yields zero position size")]
    ZeroStopDistance(f64),

    #[error("invalid position size: {0}")]
    InvalidSize(f64),

    #[error("a position is already open")]
    PositionOpen,

    #[error("malformed bar: {0}")]
    MalformedBar(#[from] CandleValidationError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
