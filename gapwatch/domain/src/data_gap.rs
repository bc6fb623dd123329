use crate::{BoundaryWindow, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base-timeframe slots missing from an aggregation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataGap {
    symbol: String,
    window: BoundaryWindow,
    base: Timeframe,
    missing: Vec<DateTime<Utc>>,
}

impl DataGap {
    pub fn new(
        symbol: String,
        window: BoundaryWindow,
        base: Timeframe,
        missing: Vec<DateTime<Utc>>,
    ) -> Self {
        Self {
            symbol,
            window,
            base,
            missing,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn window(&self) -> &BoundaryWindow {
        &self.window
    }

    pub fn base(&self) -> Timeframe {
        self.base
    }

    pub fn missing(&self) -> &[DateTime<Utc>] {
        &self.missing
    }

    pub fn slots(&self) -> usize {
        self.missing.len()
    }
}

/// Returns every expected `base` slot of `window` that is absent from
/// `present`, considering only slots strictly before `until` when given.
pub fn missing_slots(
    window: &BoundaryWindow,
    base: Timeframe,
    present: &[DateTime<Utc>],
    until: Option<DateTime<Utc>>,
) -> Vec<DateTime<Utc>> {
    window
        .slots(base)
        .into_iter()
        .filter(|slot| until.map_or(true, |limit| *slot < limit))
        .filter(|slot| !present.contains(slot))
        .collect()
}
