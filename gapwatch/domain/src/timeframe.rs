use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar sampling period. Labels follow the feed's interval names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "60M")]
    H1,
    #[serde(rename = "4H")]
    H4,
    #[serde(rename = "1D")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::H1, Timeframe::H4, Timeframe::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "60M",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 4 * 3_600,
            Timeframe::D1 => 24 * 3_600,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(self.seconds()) == 0
    }

    /// Number of `base` bars that make up one bar of `self`, if `self` can be
    /// built from `base` at all.
    pub fn slots_of(&self, base: Timeframe) -> Option<u32> {
        let (own, step) = (self.seconds(), base.seconds());
        if own > step && own % step == 0 {
            u32::try_from(own / step).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "60M" | "1H" | "H1" => Ok(Timeframe::H1),
            "4H" | "240M" | "H4" => Ok(Timeframe::H4),
            "1D" | "D" | "24H" | "D1" => Ok(Timeframe::D1),
            _ => Err(TimeframeParseError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown timeframe: {0}")]
pub struct TimeframeParseError(pub String);
