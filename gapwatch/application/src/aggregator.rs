use chrono::{DateTime, Utc};
use gapwatch_domain::{build_derived_bar, missing_slots, Bar, BoundaryWindow, DataGap, Timeframe};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::bar_store::{AppendOutcome, BarStore, RejectReason};
use crate::ports::RepositoryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Derived bar built and accepted by the store.
    Emitted(Bar),
    /// The store already held a bar for this window.
    AlreadyPresent(BoundaryWindow),
    /// Window closed with base slots missing; nothing emitted.
    Withheld(DataGap),
    Rejected(RejectReason),
}

#[derive(Debug)]
struct PendingWindow {
    window: BoundaryWindow,
    bars: Vec<Bar>,
    warned: bool,
}

impl PendingWindow {
    fn open_times(&self) -> Vec<DateTime<Utc>> {
        self.bars.iter().map(Bar::open_time).collect()
    }

    fn add(&mut self, bar: &Bar) {
        if self.bars.iter().any(|b| b.open_time() == bar.open_time()) {
            return;
        }
        self.bars.push(bar.clone());
        self.bars.sort_by_key(Bar::open_time);
    }
}

/// Builds derived-timeframe bars from accepted base bars, one window at a
/// time, and only when every base slot of the window is present.
#[derive(Debug)]
pub struct BarAggregator {
    base: Timeframe,
    derived: Vec<Timeframe>,
    pending: HashMap<(String, Timeframe), PendingWindow>,
}

impl BarAggregator {
    /// Derived timeframes that are not a strict multiple of `base` are
    /// dropped.
    pub fn new(base: Timeframe, derived: Vec<Timeframe>) -> Self {
        let derived = derived
            .into_iter()
            .filter(|tf| tf.slots_of(base).is_some_and(|slots| slots > 1))
            .collect();
        Self {
            base,
            derived,
            pending: HashMap::new(),
        }
    }

    pub fn base(&self) -> Timeframe {
        self.base
    }

    pub fn derived(&self) -> &[Timeframe] {
        &self.derived
    }

    /// Called once per base bar the store accepted.
    pub async fn on_base_bar_appended(
        &mut self,
        store: &dyn BarStore,
        bar: &Bar,
    ) -> Result<Vec<AggregationOutcome>, RepositoryError> {
        if bar.timeframe() != self.base {
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        for timeframe in self.derived.clone() {
            outcomes.extend(self.advance(store, timeframe, bar).await?);
        }
        Ok(outcomes)
    }

    async fn advance(
        &mut self,
        store: &dyn BarStore,
        timeframe: Timeframe,
        bar: &Bar,
    ) -> Result<Vec<AggregationOutcome>, RepositoryError> {
        let base = self.base;
        let key = (bar.symbol().to_string(), timeframe);
        let window = BoundaryWindow::containing(bar.open_time(), timeframe);
        let mut outcomes = Vec::new();

        let stale = self
            .pending
            .get(&key)
            .is_some_and(|pending| pending.window != window);
        if stale {
            if let Some(previous) = self.pending.remove(&key) {
                // the previous window never saw its last slot
                if previous.window.start() < window.start() {
                    let gap = withhold(bar.symbol(), previous, base);
                    outcomes.push(AggregationOutcome::Withheld(gap));
                }
            }
        }

        if !self.pending.contains_key(&key) {
            let seeded = seed(store, bar.symbol(), base, &window).await?;
            self.pending.insert(
                key.clone(),
                PendingWindow {
                    window,
                    bars: seeded,
                    warned: false,
                },
            );
        }

        let Some(pending) = self.pending.get_mut(&key) else {
            return Ok(outcomes);
        };
        pending.add(bar);

        let missing = missing_slots(
            &pending.window,
            base,
            &pending.open_times(),
            Some(bar.open_time()),
        );
        if !missing.is_empty() && !pending.warned {
            warn!(
                "Data gap in {} {} window starting {}: {} base bar(s) missing, withholding",
                bar.symbol(),
                timeframe,
                pending.window.start(),
                missing.len()
            );
            pending.warned = true;
        }

        if !window.is_last_slot(bar.open_time(), base) {
            return Ok(outcomes);
        }

        let Some(settled) = self.pending.remove(&key) else {
            return Ok(outcomes);
        };
        if !missing_slots(&settled.window, base, &settled.open_times(), None).is_empty() {
            let gap = withhold(bar.symbol(), settled, base);
            outcomes.push(AggregationOutcome::Withheld(gap));
            return Ok(outcomes);
        }

        let derived = match build_derived_bar(&settled.window, &settled.bars) {
            Ok(derived) => derived,
            Err(e) => {
                warn!("Could not build {} bar for {}: {}", timeframe, settled.window.start(), e);
                return Ok(outcomes);
            }
        };

        let outcome = match store.append(derived).await? {
            AppendOutcome::Accepted(derived) => {
                info!(
                    "Derived {} {} bar at {} (o={} h={} l={} c={})",
                    derived.symbol(),
                    timeframe,
                    derived.open_time(),
                    derived.open(),
                    derived.high(),
                    derived.low(),
                    derived.close()
                );
                AggregationOutcome::Emitted(derived)
            }
            AppendOutcome::Duplicate => AggregationOutcome::AlreadyPresent(settled.window),
            AppendOutcome::Rejected(reason) => AggregationOutcome::Rejected(reason),
        };
        outcomes.push(outcome);
        Ok(outcomes)
    }
}

// Base bars already stored for `window`, so a restart resumes mid-window.
async fn seed(
    store: &dyn BarStore,
    symbol: &str,
    base: Timeframe,
    window: &BoundaryWindow,
) -> Result<Vec<Bar>, RepositoryError> {
    let slots = window.slots(base).len();
    Ok(store
        .get_recent(symbol, base, slots)
        .await?
        .into_iter()
        .filter(|bar| window.contains(bar.open_time()))
        .collect())
}

fn withhold(symbol: &str, pending: PendingWindow, base: Timeframe) -> DataGap {
    let missing = missing_slots(&pending.window, base, &pending.open_times(), None);
    if !pending.warned {
        warn!(
            "Data gap in {} {} window starting {}: {} base bar(s) missing, withholding",
            symbol,
            pending.window.timeframe(),
            pending.window.start(),
            missing.len()
        );
    }
    DataGap::new(symbol.to_string(), pending.window, base, missing)
}
