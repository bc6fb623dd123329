use gapwatch_domain::{Bar, GapEvent, LedgerState, LifecycleManager, Timeframe};
use serde::Serialize;
use std::path::PathBuf;

/// Runs `bars` (oldest first, one series) through the lifecycle as if each
/// arrived on its own tick. Returns the events in order.
pub fn replay_series(
    manager: &LifecycleManager,
    state: &mut LedgerState,
    symbol: &str,
    timeframe: Timeframe,
    bars: &[Bar],
) -> Vec<GapEvent> {
    let mut events = Vec::new();
    for end in 0..bars.len() {
        let window = &bars[end.saturating_sub(2)..=end];
        events.extend(manager.on_new_bar(state, symbol, timeframe, window));
    }
    events
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesRebuild {
    pub timeframe: Timeframe,
    pub bars: usize,
    pub gaps: usize,
    pub open: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub symbol: String,
    pub series: Vec<SeriesRebuild>,
    /// Set when the rebuilt ledger was written out.
    pub written_to: Option<PathBuf>,
}

impl RebuildReport {
    pub fn total_gaps(&self) -> usize {
        self.series.iter().map(|s| s.gaps).sum()
    }
}
