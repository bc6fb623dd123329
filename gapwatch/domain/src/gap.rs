use crate::{Bar, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the triggering bar the gap lies on: `Up` gaps sit above
/// price and fill on a move up, `Down` gaps sit below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapDirection {
    Up,
    Down,
}

impl GapDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapDirection::Up => "up",
            GapDirection::Down => "down",
        }
    }
}

impl fmt::Display for GapDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapStatus {
    Open,
    Closed,
}

/// Per-(symbol, timeframe) sequence number, rendered as `G00001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GapId(u64);

impl GapId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{:05}", self.0)
    }
}

/// Detector output before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapCandidate {
    pub direction: GapDirection,
    pub low: Decimal,
    pub high: Decimal,
    pub found_at: DateTime<Utc>,
}

impl GapCandidate {
    pub fn overlaps(&self, low: Decimal, high: Decimal) -> bool {
        self.low <= high && self.high >= low
    }
}

/// A ledger entry. Field order is the persisted record order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    id: GapId,
    symbol: String,
    timeframe: Timeframe,
    direction: GapDirection,
    low: Decimal,
    high: Decimal,
    found_at: DateTime<Utc>,
    status: GapStatus,
    #[serde(with = "closed_at_field")]
    closed_at: Option<DateTime<Utc>>,
}

impl Gap {
    pub fn open(id: GapId, symbol: String, timeframe: Timeframe, candidate: GapCandidate) -> Self {
        Self {
            id,
            symbol,
            timeframe,
            direction: candidate.direction,
            low: candidate.low,
            high: candidate.high,
            found_at: candidate.found_at,
            status: GapStatus::Open,
            closed_at: None,
        }
    }

    pub fn id(&self) -> GapId {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn direction(&self) -> GapDirection {
        self.direction
    }

    pub fn low(&self) -> Decimal {
        self.low
    }

    pub fn high(&self) -> Decimal {
        self.high
    }

    pub fn found_at(&self) -> DateTime<Utc> {
        self.found_at
    }

    pub fn status(&self) -> GapStatus {
        self.status
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_open(&self) -> bool {
        self.status == GapStatus::Open
    }

    pub fn belongs_to(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.symbol == symbol && self.timeframe == timeframe
    }

    pub fn overlaps(&self, low: Decimal, high: Decimal) -> bool {
        self.low <= high && self.high >= low
    }

    /// A bar fills the gap when it trades into the range after the bar that
    /// found it.
    pub fn is_filled_by(&self, bar: &Bar) -> bool {
        self.is_open() && bar.open_time() > self.found_at && bar.intersects(self.low, self.high)
    }

    /// Transitions open -> closed. Returns false if already closed.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = GapStatus::Closed;
        self.closed_at = Some(at);
        true
    }
}

// `closed_at` is persisted as ISO-8601 UTC, or an empty string while open.
mod closed_at_field {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    fn sample_gap() -> Gap {
        Gap::open(
            GapId::new(1),
            "BTC_USDT".to_string(),
            Timeframe::H1,
            GapCandidate {
                direction: GapDirection::Up,
                low: dec!(88),
                high: dec!(94),
                found_at: hour(2),
            },
        )
    }

    fn bar_at(h: u32, high: Decimal, low: Decimal) -> Bar {
        Bar::new(
            "BTC_USDT".to_string(),
            Timeframe::H1,
            hour(h),
            low,
            high,
            low,
            low,
            dec!(1),
        )
        .unwrap()
    }

    #[test]
    fn test_id_display() {
        assert_eq!(GapId::new(7).to_string(), "G00007");
    }

    #[test]
    fn test_close_is_one_way() {
        let mut gap = sample_gap();
        assert!(gap.close(hour(3)));
        assert_eq!(gap.status(), GapStatus::Closed);
        assert!(!gap.close(hour(4)));
        assert_eq!(gap.closed_at(), Some(hour(3)));
    }

    #[test]
    fn test_triggering_bar_never_fills_its_gap() {
        let gap = sample_gap();
        assert!(!gap.is_filled_by(&bar_at(2, dec!(90), dec!(87))));
        assert!(gap.is_filled_by(&bar_at(3, dec!(90), dec!(85))));
        assert!(!gap.is_filled_by(&bar_at(3, dec!(87), dec!(85))));
    }

    #[test]
    fn test_record_field_order_and_empty_closed_at() {
        let json = serde_json::to_string(&sample_gap()).unwrap();
        assert_eq!(
            json,
            r#"{"id":1,"symbol":"BTC_USDT","timeframe":"60M","direction":"up","low":"88","high":"94","found_at":"2025-01-01T02:00:00Z","status":"open","closed_at":""}"#
        );

        let back: Gap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_gap());
    }

    #[test]
    fn test_closed_gap_serializes_timestamp() {
        let mut gap = sample_gap();
        gap.close(hour(5));
        let json = serde_json::to_string(&gap).unwrap();
        assert!(json.ends_with(r#""status":"closed","closed_at":"2025-01-01T05:00:00Z"}"#));
        let back: Gap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.closed_at(), Some(hour(5)));
    }
}
