//! Core data types used across the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regime::VolatilityRegime;

/// Validation errors for candle data
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleValidationError {
    #[error("prices must be finite: open={open}, high={high}, low={low}, close={close}")]
    NonFinitePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data.
///
/// Inside the engine every candle is labeled by its close time, so a 1h bar
/// stamped 10:00 covers (09:00, 10:00]. Open-labeled files are restamped on
/// load, see [`BarLabel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (trusted sources, tests)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(CandleValidationError::NonFinitePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if prices.iter().any(|&p| p <= 0.0) {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume.is_nan() || self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    /// Check if the candle is valid without returning detailed error
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Order side submitted to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Which edge of its interval a data file stamps each bar with.
///
/// Exchange downloads usually stamp the open time; the engine works on close
/// time, so open-labeled bars are shifted forward by one bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarLabel {
    Open,
    #[default]
    Close,
}

impl std::str::FromStr for BarLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(BarLabel::Open),
            "close" => Ok(BarLabel::Close),
            other => Err(format!("unknown bar label '{}', expected open or close", other)),
        }
    }
}

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short. Multiplying a price move by this turns it
    /// into a favorable (positive) or adverse (negative) move.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    /// Side of the order that opens a position in this direction
    pub fn entry_side(self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Side of the order that reduces or closes a position in this direction
    pub fn exit_side(self) -> Side {
        match self {
            Direction::Long => Side::Sell,
            Direction::Short => Side::Buy,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Why a position went flat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Initial -1R stop hit before any partial
    InitialStop,
    /// ATR trail (or ratchet floor) hit after `after` partials, runner not yet reached
    AtrTrail { after: u8 },
    /// Runner trailed out after every scheduled partial was taken
    RunnerTrail,
    /// Last scheduled partial closed whatever size was left
    ScheduleComplete,
    /// Closed from outside the state machine (reversal, end of data)
    ForceClosed,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::InitialStop => write!(f, "STOP (-1R)"),
            ExitReason::AtrTrail { after } => write!(f, "ATR TRAIL (after {}R)", after),
            ExitReason::RunnerTrail => write!(f, "RUNNER TRAIL"),
            ExitReason::ScheduleComplete => write!(f, "FINAL TARGET"),
            ExitReason::ForceClosed => write!(f, "FORCE CLOSE"),
        }
    }
}

/// What a trade intent does to the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Entry,
    /// Scheduled partial; the value is the 1-based level just taken
    Partial(u8),
    Exit(ExitReason),
}

/// Order the caller submits to its broker abstraction.
///
/// Fills are assumed at `price`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub time: DateTime<Utc>,
    pub direction: Direction,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub kind: IntentKind,
}

/// Fixed-shape record describing an entry, for downstream analytics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeContext {
    pub atr: f64,
    pub stop_distance: f64,
    /// Risk per trade as a percent of equity (3.0 = 3%)
    pub risk_pct: f64,
    pub position_size: f64,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Length of the squeeze that produced the entry, in signal bars
    pub squeeze_bars: usize,
    /// Regime volatility at entry; `None` when the classifier was unavailable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volatility: Option<VolatilityRegime>,
}

/// Completed round trip, from entry to flat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    /// Fill price of the final close
    pub exit_price: f64,
    pub initial_size: f64,
    pub partials_taken: u8,
    /// R-multiple of the final close
    pub r_multiple: f64,
    /// Size-weighted R across every fill that reduced the position
    pub realized_r: f64,
    /// Maximum favorable excursion, in R
    pub mfe_r: f64,
    pub reason: ExitReason,
    /// Number of finer-cadence updates the position lived through
    pub updates_held: usize,
    pub context: TradeContext,
}

impl ClosedTrade {
    pub fn is_winner(&self) -> bool {
        self.realized_r > 0.0
    }

    /// Realized PnL in price units
    pub fn pnl(&self) -> f64 {
        self.realized_r * self.context.stop_distance * self.initial_size
    }
}

// ============================================================================
// Money Type - Decimal accumulation for equity and PnL
// ============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::ops::{Add, AddAssign};

/// Decimal wrapper for equity accounting.
///
/// Indicator and price math stays in `f64`; only running balances go through
/// `Money` so that thousands of partial fills do not drift.
///
/// # Example
/// ```
/// use squeeze_breakout::Money;
/// let a = Money::from_f64(0.1);
/// let b = Money::from_f64(0.2);
/// assert_eq!(a + b, Money::from_f64(0.3));
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create from f64. NaN and infinities map to zero.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Money::ZERO;
        }
        Money(
            Decimal::try_from(value)
                .or_else(|_| Decimal::from_f64_retain(value).ok_or(()))
                .unwrap_or(Decimal::ZERO),
        )
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.round_dp(2))
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}
