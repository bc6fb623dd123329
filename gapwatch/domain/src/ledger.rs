use crate::{Bar, Gap, GapCandidate, GapId, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-series bookkeeping: the next id to hand out and the newest bar that
/// has already been run through the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesState {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub next_id: u64,
    pub cursor: Option<DateTime<Utc>>,
}

impl SeriesState {
    fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            next_id: 1,
            cursor: None,
        }
    }

    fn is(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.symbol == symbol && self.timeframe == timeframe
    }
}

/// The whole persisted gap ledger. Gaps are never removed; closing only
/// flips status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    #[serde(default)]
    pub series: Vec<SeriesState>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

impl LedgerState {
    pub fn gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn open_gaps(&self, symbol: &str, timeframe: Timeframe) -> Vec<&Gap> {
        self.gaps
            .iter()
            .filter(|gap| gap.is_open() && gap.belongs_to(symbol, timeframe))
            .collect()
    }

    pub fn all_open(&self) -> Vec<&Gap> {
        self.gaps.iter().filter(|gap| gap.is_open()).collect()
    }

    pub fn cursor(&self, symbol: &str, timeframe: Timeframe) -> Option<DateTime<Utc>> {
        self.series
            .iter()
            .find(|s| s.is(symbol, timeframe))
            .and_then(|s| s.cursor)
    }

    /// Moves the cursor forward; an older timestamp is ignored.
    pub fn advance_cursor(&mut self, symbol: &str, timeframe: Timeframe, to: DateTime<Utc>) {
        let series = self.series_mut(symbol, timeframe);
        if series.cursor.map_or(true, |current| to > current) {
            series.cursor = Some(to);
        }
    }

    /// Next id for the series. Never reuses an id already present in the
    /// ledger, even if `next_id` was lost or edited.
    pub fn allocate_id(&mut self, symbol: &str, timeframe: Timeframe) -> GapId {
        let highest = self
            .gaps
            .iter()
            .filter(|gap| gap.belongs_to(symbol, timeframe))
            .map(|gap| gap.id().value())
            .max()
            .unwrap_or(0);
        let series = self.series_mut(symbol, timeframe);
        let id = series.next_id.max(highest + 1);
        series.next_id = id + 1;
        GapId::new(id)
    }

    pub fn insert(&mut self, gap: Gap) {
        self.gaps.push(gap);
    }

    /// A candidate is a duplicate when the series already has a gap found at
    /// the same bar, or an open gap whose range overlaps it.
    pub fn is_duplicate(&self, symbol: &str, timeframe: Timeframe, candidate: &GapCandidate) -> bool {
        self.gaps
            .iter()
            .filter(|gap| gap.belongs_to(symbol, timeframe))
            .any(|gap| {
                gap.found_at() == candidate.found_at
                    || (gap.is_open() && gap.overlaps(candidate.low, candidate.high))
            })
    }

    /// Closes every open gap of the series that `bar` trades into, stamping
    /// the bar's open time. Returns the gaps as closed.
    pub fn close_filled(&mut self, symbol: &str, timeframe: Timeframe, bar: &Bar) -> Vec<Gap> {
        let mut closed = Vec::new();
        for gap in self
            .gaps
            .iter_mut()
            .filter(|gap| gap.belongs_to(symbol, timeframe) && gap.is_filled_by(bar))
        {
            if gap.close(bar.open_time()) {
                closed.push(gap.clone());
            }
        }
        closed
    }

    fn series_mut(&mut self, symbol: &str, timeframe: Timeframe) -> &mut SeriesState {
        let index = match self.series.iter().position(|s| s.is(symbol, timeframe)) {
            Some(index) => index,
            None => {
                self.series.push(SeriesState::new(symbol, timeframe));
                self.series.len() - 1
            }
        };
        &mut self.series[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GapDirection, GapStatus};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTC_USDT";

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, h, 0, 0).unwrap()
    }

    fn candidate(h: u32, low: Decimal, high: Decimal) -> GapCandidate {
        GapCandidate {
            direction: GapDirection::Up,
            low,
            high,
            found_at: hour(h),
        }
    }

    fn bar(h: u32, high: Decimal, low: Decimal) -> Bar {
        Bar::new(
            SYMBOL.to_string(),
            Timeframe::H1,
            hour(h),
            high,
            high,
            low,
            low,
            dec!(1),
        )
        .unwrap()
    }

    fn ledger_with_gap() -> LedgerState {
        let mut ledger = LedgerState::default();
        let id = ledger.allocate_id(SYMBOL, Timeframe::H1);
        ledger.insert(Gap::open(
            id,
            SYMBOL.to_string(),
            Timeframe::H1,
            candidate(2, dec!(88), dec!(94)),
        ));
        ledger
    }

    #[test]
    fn test_ids_are_sequential_per_series() {
        let mut ledger = LedgerState::default();
        assert_eq!(ledger.allocate_id(SYMBOL, Timeframe::H1), GapId::new(1));
        assert_eq!(ledger.allocate_id(SYMBOL, Timeframe::H1), GapId::new(2));
        assert_eq!(ledger.allocate_id(SYMBOL, Timeframe::H4), GapId::new(1));
        assert_eq!(ledger.allocate_id("ETH_USDT", Timeframe::H1), GapId::new(1));
    }

    #[test]
    fn test_ids_skip_past_existing_gaps() {
        let mut ledger = ledger_with_gap();
        ledger.series.clear();
        assert_eq!(ledger.allocate_id(SYMBOL, Timeframe::H1), GapId::new(2));
    }

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut ledger = LedgerState::default();
        assert_eq!(ledger.cursor(SYMBOL, Timeframe::H1), None);
        ledger.advance_cursor(SYMBOL, Timeframe::H1, hour(5));
        ledger.advance_cursor(SYMBOL, Timeframe::H1, hour(3));
        assert_eq!(ledger.cursor(SYMBOL, Timeframe::H1), Some(hour(5)));
        assert_eq!(ledger.cursor(SYMBOL, Timeframe::H4), None);
    }

    #[test]
    fn test_duplicate_by_found_at_or_open_overlap() {
        let ledger = ledger_with_gap();
        assert!(ledger.is_duplicate(SYMBOL, Timeframe::H1, &candidate(2, dec!(1), dec!(2))));
        assert!(ledger.is_duplicate(SYMBOL, Timeframe::H1, &candidate(5, dec!(90), dec!(99))));
        assert!(!ledger.is_duplicate(SYMBOL, Timeframe::H1, &candidate(5, dec!(95), dec!(99))));
        assert!(!ledger.is_duplicate(SYMBOL, Timeframe::H4, &candidate(2, dec!(90), dec!(99))));
    }

    #[test]
    fn test_closed_gap_no_longer_blocks_overlap() {
        let mut ledger = ledger_with_gap();
        ledger.close_filled(SYMBOL, Timeframe::H1, &bar(3, dec!(90), dec!(85)));
        assert!(!ledger.is_duplicate(SYMBOL, Timeframe::H1, &candidate(5, dec!(90), dec!(99))));
    }

    #[test]
    fn test_close_filled_stamps_bar_time_once() {
        let mut ledger = ledger_with_gap();

        let untouched = ledger.close_filled(SYMBOL, Timeframe::H1, &bar(3, dec!(87), dec!(85)));
        assert!(untouched.is_empty());

        let closed = ledger.close_filled(SYMBOL, Timeframe::H1, &bar(4, dec!(95), dec!(93)));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status(), GapStatus::Closed);
        assert_eq!(closed[0].closed_at(), Some(hour(4)));

        let again = ledger.close_filled(SYMBOL, Timeframe::H1, &bar(5, dec!(95), dec!(93)));
        assert!(again.is_empty());
        assert!(ledger.open_gaps(SYMBOL, Timeframe::H1).is_empty());
        assert_eq!(ledger.gaps().len(), 1);
    }

    #[test]
    fn test_state_survives_json() {
        let mut ledger = ledger_with_gap();
        ledger.advance_cursor(SYMBOL, Timeframe::H1, hour(2));
        let json = serde_json::to_string(&ledger).unwrap();
        let back: LedgerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ledger);
        assert_eq!(back.all_open().len(), 1);
    }
}
