use crate::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Decimal places a price or volume may carry in a persisted bar series.
pub const PRICE_SCALE: u32 = 10;

/// One OHLCV observation, stamped at its opening instant.
///
/// Deserialization goes through [`Bar::new`], so a decoded bar is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBar")]
pub struct Bar {
    symbol: String,
    timeframe: Timeframe,
    open_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl Bar {
    pub fn new(
        symbol: String,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Result<Self, BarValidationError> {
        let bar = Self {
            symbol,
            timeframe,
            open_time,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    /// Builds a bar from raw feed floats, rejecting NaN and infinities.
    /// Values are rounded to [`PRICE_SCALE`] places.
    pub fn from_f64(
        symbol: String,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BarValidationError> {
        Self::new(
            symbol,
            timeframe,
            open_time,
            to_decimal(open, "open")?,
            to_decimal(high, "high")?,
            to_decimal(low, "low")?,
            to_decimal(close, "close")?,
            to_decimal(volume, "volume")?,
        )
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.symbol.is_empty() {
            return Err(BarValidationError::EmptySymbol);
        }

        for (field, price) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if price <= Decimal::ZERO {
                return Err(BarValidationError::NonPositivePrice(field));
            }
        }

        if self.volume < Decimal::ZERO {
            return Err(BarValidationError::NegativeVolume);
        }

        if self.low > self.high {
            return Err(BarValidationError::InvertedRange {
                low: self.low,
                high: self.high,
            });
        }

        if self.high < self.body_high() || self.low > self.body_low() {
            return Err(BarValidationError::BodyOutsideRange);
        }

        Ok(())
    }

    /// Fails when any price or the volume has more than `scale` decimal places.
    pub fn check_scale(&self, scale: u32) -> Result<(), BarValidationError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if value.normalize().scale() > scale {
                return Err(BarValidationError::ExcessPrecision { field, scale });
            }
        }
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    pub fn close_time(&self) -> DateTime<Utc> {
        self.open_time + self.timeframe.duration()
    }

    pub fn open(&self) -> Decimal {
        self.open
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn close(&self) -> Decimal {
        self.close
    }

    pub fn volume(&self) -> Decimal {
        self.volume
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn body_low(&self) -> Decimal {
        self.open.min(self.close)
    }

    pub fn body_high(&self) -> Decimal {
        self.open.max(self.close)
    }

    /// Closed-interval test of this bar's wick range against `[low, high]`.
    pub fn intersects(&self, low: Decimal, high: Decimal) -> bool {
        self.low <= high && self.high >= low
    }

    /// Same bar moved onto another grid point.
    pub fn realigned(&self, open_time: DateTime<Utc>) -> Self {
        Self {
            open_time,
            ..self.clone()
        }
    }
}

fn to_decimal(value: f64, field: &'static str) -> Result<Decimal, BarValidationError> {
    if !value.is_finite() {
        return Err(BarValidationError::NonFinite(field));
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(PRICE_SCALE).normalize())
        .ok_or(BarValidationError::NonFinite(field))
}

#[derive(Deserialize)]
struct RawBar {
    symbol: String,
    timeframe: Timeframe,
    open_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl TryFrom<RawBar> for Bar {
    type Error = BarValidationError;

    fn try_from(raw: RawBar) -> Result<Self, Self::Error> {
        Bar::new(
            raw.symbol,
            raw.timeframe,
            raw.open_time,
            raw.open,
            raw.high,
            raw.low,
            raw.close,
            raw.volume,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarValidationError {
    #[error("Symbol cannot be empty")]
    EmptySymbol,
    #[error("Non-finite value for {0}")]
    NonFinite(&'static str),
    #[error("Price must be positive: {0}")]
    NonPositivePrice(&'static str),
    #[error("Volume cannot be negative")]
    NegativeVolume,
    #[error("Low {low} is above high {high}")]
    InvertedRange { low: Decimal, high: Decimal },
    #[error("Open/close outside of the high-low range")]
    BodyOutsideRange,
    #[error("{field} has more than {scale} decimal places")]
    ExcessPrecision { field: &'static str, scale: u32 },
}
