use crate::{
    detect_with, Bar, BoundaryRule, DetectionMode, DetectionWindow, Gap, LedgerState, Timeframe,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "gap", rename_all = "snake_case")]
pub enum GapEvent {
    Found(Gap),
    Closed(Gap),
}

impl GapEvent {
    pub fn gap(&self) -> &Gap {
        match self {
            GapEvent::Found(gap) | GapEvent::Closed(gap) => gap,
        }
    }
}

/// Drives the open -> closed state machine of every gap in a [`LedgerState`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleManager {
    mode: DetectionMode,
    rule: BoundaryRule,
}

impl LifecycleManager {
    pub fn new(mode: DetectionMode, rule: BoundaryRule) -> Self {
        Self { mode, rule }
    }

    pub fn mode(&self) -> DetectionMode {
        self.mode
    }

    pub fn rule(&self) -> BoundaryRule {
        self.rule
    }

    /// Applies the newest bar of `window` to the ledger.
    ///
    /// Open gaps the bar trades into are closed first; the bar then runs
    /// through detection and a new gap is recorded unless it duplicates one
    /// already in the series. A bar at or before the series cursor has
    /// already been acted upon and changes nothing.
    pub fn on_new_bar(
        &self,
        ledger: &mut LedgerState,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Bar],
    ) -> Vec<GapEvent> {
        let Some(newest) = window.last() else {
            return Vec::new();
        };
        if let Some(cursor) = ledger.cursor(symbol, timeframe) {
            if newest.open_time() <= cursor {
                return Vec::new();
            }
        }

        let mut events: Vec<GapEvent> = ledger
            .close_filled(symbol, timeframe, newest)
            .into_iter()
            .map(GapEvent::Closed)
            .collect();

        let candidate = DetectionWindow::from_tail(window)
            .and_then(|triple| detect_with(&triple, self.mode, self.rule))
            .filter(|candidate| !ledger.is_duplicate(symbol, timeframe, candidate));

        if let Some(candidate) = candidate {
            let id = ledger.allocate_id(symbol, timeframe);
            let gap = Gap::open(id, symbol.to_string(), timeframe, candidate);
            ledger.insert(gap.clone());
            events.push(GapEvent::Found(gap));
        }

        ledger.advance_cursor(symbol, timeframe, newest.open_time());
        events
    }
}
