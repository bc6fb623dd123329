use async_trait::async_trait;
use gapwatch_domain::{DetectionMode, Gap, GapEvent, LedgerState, LifecycleManager, Timeframe};
use serde::Serialize;
use shaku::{Component, Interface};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::aggregator::{AggregationOutcome, BarAggregator};
use crate::bar_store::{AppendOutcome, BarStore};
use crate::config::MonitorConfig;
use crate::ports::{
    BarRepository, BarSource, EventSink, GapLedgerRepository, LedgerError, RepositoryError,
};
use crate::rebuild::{replay_series, RebuildReport, SeriesRebuild};
use crate::summary::{scan_candidates, DirectionFilter, GapSummary};

#[async_trait]
pub trait GapMonitorService: Interface {
    /// One transaction: ingest, aggregate, run the lifecycle over every
    /// touched series, commit the ledger, then emit events.
    async fn run_tick(&self, symbol: &str, timeframe: Timeframe)
        -> Result<TickReport, MonitorError>;

    /// Candidates in the last `last_n` stored bars. Never touches the ledger.
    async fn summarize_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        last_n: usize,
        mode: DetectionMode,
        filter: DirectionFilter,
    ) -> Result<GapSummary, MonitorError>;

    /// Replays the full persisted history into a fresh ledger. With `output`
    /// the result is written to a new file there; the live ledger is never
    /// modified.
    async fn rebuild(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        output: Option<&Path>,
    ) -> Result<RebuildReport, MonitorError>;

    async fn open_gaps(&self, symbol: Option<&str>) -> Result<Vec<Gap>, MonitorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars_accepted: usize,
    pub bars_duplicate: usize,
    pub bars_rejected: usize,
    pub derived_bars: usize,
    pub withheld_windows: usize,
    pub gaps_found: usize,
    pub gaps_closed: usize,
}

impl TickReport {
    fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            bars_accepted: 0,
            bars_duplicate: 0,
            bars_rejected: 0,
            derived_bars: 0,
            withheld_windows: 0,
            gaps_found: 0,
            gaps_closed: 0,
        }
    }
}

#[derive(Component)]
#[shaku(interface = GapMonitorService)]
pub struct GapMonitorServiceImpl {
    #[shaku(inject)]
    source: Arc<dyn BarSource>,

    #[shaku(inject)]
    store: Arc<dyn BarStore>,

    #[shaku(inject)]
    bars: Arc<dyn BarRepository>,

    #[shaku(inject)]
    ledger: Arc<dyn GapLedgerRepository>,

    #[shaku(inject)]
    sink: Arc<dyn EventSink>,

    #[shaku(default = MonitorConfig::default())]
    config: MonitorConfig,

    // Held for the whole tick; it is the single-writer lock on the ledger.
    #[shaku(default = Mutex::new(None))]
    aggregator: Mutex<Option<BarAggregator>>,
}

impl GapMonitorServiceImpl {
    pub fn new(
        source: Arc<dyn BarSource>,
        store: Arc<dyn BarStore>,
        bars: Arc<dyn BarRepository>,
        ledger: Arc<dyn GapLedgerRepository>,
        sink: Arc<dyn EventSink>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            source,
            store,
            bars,
            ledger,
            sink,
            config,
            aggregator: Mutex::new(None),
        }
    }

    fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(self.config.mode, self.config.boundary_rule)
    }

    async fn ingest(
        &self,
        aggregator: &mut BarAggregator,
        symbol: &str,
        timeframe: Timeframe,
        report: &mut TickReport,
        touched: &mut Vec<Timeframe>,
    ) -> Result<(), MonitorError> {
        let fetched = match self
            .source
            .get_recent(symbol, timeframe, self.config.fetch_limit)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(
                    "Source failed for {} {}: {}; continuing with stored bars",
                    symbol, timeframe, e
                );
                return Ok(());
            }
        };

        for bar in fetched {
            if bar.symbol() != symbol {
                warn!("Skipping {} bar delivered for {}", bar.symbol(), symbol);
                report.bars_rejected += 1;
                continue;
            }
            match self.store.append(bar).await? {
                AppendOutcome::Accepted(bar) => {
                    report.bars_accepted += 1;
                    if !touched.contains(&bar.timeframe()) {
                        touched.push(bar.timeframe());
                    }
                    let outcomes = aggregator
                        .on_base_bar_appended(self.store.as_ref(), &bar)
                        .await?;
                    for outcome in outcomes {
                        match outcome {
                            AggregationOutcome::Emitted(derived) => {
                                report.derived_bars += 1;
                                if !touched.contains(&derived.timeframe()) {
                                    touched.push(derived.timeframe());
                                }
                            }
                            AggregationOutcome::Withheld(_) => report.withheld_windows += 1,
                            AggregationOutcome::AlreadyPresent(window) => debug!(
                                "{} window at {} already built",
                                window.timeframe(),
                                window.start()
                            ),
                            AggregationOutcome::Rejected(reason) => {
                                warn!("Derived bar rejected: {}", reason);
                            }
                        }
                    }
                }
                AppendOutcome::Duplicate => report.bars_duplicate += 1,
                AppendOutcome::Rejected(_) => report.bars_rejected += 1,
            }
        }
        Ok(())
    }

    async fn emit(&self, events: &[GapEvent], report: &mut TickReport) {
        for event in events {
            match event {
                GapEvent::Found(gap) => {
                    report.gaps_found += 1;
                    self.sink.on_gap_found(gap).await;
                }
                GapEvent::Closed(gap) => {
                    report.gaps_closed += 1;
                    self.sink.on_gap_closed(gap).await;
                }
            }
        }
    }
}

#[async_trait]
impl GapMonitorService for GapMonitorServiceImpl {
    async fn run_tick(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<TickReport, MonitorError> {
        let mut slot = self.aggregator.lock().await;
        let aggregator = slot.get_or_insert_with(|| {
            BarAggregator::new(
                self.config.base_timeframe,
                self.config.derived_timeframes.clone(),
            )
        });

        let mut report = TickReport::new(symbol, timeframe);
        let mut touched = vec![timeframe];
        if timeframe == aggregator.base() {
            // derived series may have been built by earlier base ticks
            touched.extend(aggregator.derived().iter().copied());
        }

        if timeframe == aggregator.base() || self.config.fetch_derived_from_source {
            self.ingest(aggregator, symbol, timeframe, &mut report, &mut touched)
                .await?;
        }

        // held from load to commit so other processes cannot interleave
        let ledger_lock = self.ledger.lock().await.map_err(MonitorError::Ledger)?;
        let mut state = self.ledger.load().await.map_err(MonitorError::Ledger)?;
        let before = state.clone();
        let manager = self.lifecycle();
        let mut events = Vec::new();

        for tf in &touched {
            let bars = self
                .store
                .get_recent(symbol, *tf, self.store.cache_size())
                .await?;
            let cursor = state.cursor(symbol, *tf);
            for end in 0..bars.len() {
                if cursor.is_some_and(|c| bars[end].open_time() <= c) {
                    continue;
                }
                let window = &bars[end.saturating_sub(2)..=end];
                events.extend(manager.on_new_bar(&mut state, symbol, *tf, window));
            }
        }

        if state != before {
            if let Err(e) = self.ledger.commit(&state).await {
                error!(
                    "Ledger commit failed for {} {}: {}; tick abandoned",
                    symbol, timeframe, e
                );
                return Err(MonitorError::Persistence(e));
            }
        }
        drop(ledger_lock);

        for event in &events {
            let gap = event.gap();
            match event {
                GapEvent::Found(_) => info!(
                    "Recorded {} gap {} {} {} [{}, {}] at {}",
                    gap.direction(),
                    gap.id(),
                    gap.symbol(),
                    gap.timeframe(),
                    gap.low(),
                    gap.high(),
                    gap.found_at()
                ),
                GapEvent::Closed(_) => info!(
                    "Closed gap {} {} {} [{}, {}]",
                    gap.id(),
                    gap.symbol(),
                    gap.timeframe(),
                    gap.low(),
                    gap.high()
                ),
            }
        }
        self.emit(&events, &mut report).await;

        info!(
            "Tick {} {}: {} accepted, {} duplicate, {} rejected, {} derived, {} withheld, {} found, {} closed",
            symbol,
            timeframe,
            report.bars_accepted,
            report.bars_duplicate,
            report.bars_rejected,
            report.derived_bars,
            report.withheld_windows,
            report.gaps_found,
            report.gaps_closed
        );
        Ok(report)
    }

    async fn summarize_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        last_n: usize,
        mode: DetectionMode,
        filter: DirectionFilter,
    ) -> Result<GapSummary, MonitorError> {
        let bars = self.store.get_recent(symbol, timeframe, last_n).await?;
        let candidates = scan_candidates(&bars, mode, self.config.boundary_rule, filter);
        Ok(GapSummary {
            symbol: symbol.to_string(),
            timeframe,
            mode,
            filter,
            bars_scanned: bars.len(),
            candidates,
        })
    }

    async fn rebuild(
        &self,
        symbol: &str,
        timeframes: &[Timeframe],
        output: Option<&Path>,
    ) -> Result<RebuildReport, MonitorError> {
        let manager = self.lifecycle();
        let mut state = LedgerState::default();
        let mut series = Vec::new();

        for tf in timeframes {
            let bars = self.bars.load_all(symbol, *tf).await?;
            replay_series(&manager, &mut state, symbol, *tf, &bars);
            let gaps: Vec<&Gap> = state
                .gaps()
                .iter()
                .filter(|gap| gap.belongs_to(symbol, *tf))
                .collect();
            series.push(SeriesRebuild {
                timeframe: *tf,
                bars: bars.len(),
                gaps: gaps.len(),
                open: gaps.iter().filter(|gap| gap.is_open()).count(),
            });
        }

        let written_to = match output {
            Some(path) => {
                self.ledger
                    .write_new(path, &state)
                    .await
                    .map_err(MonitorError::Ledger)?;
                info!("Rebuilt ledger for {} written to {}", symbol, path.display());
                Some(path.to_path_buf())
            }
            None => None,
        };

        Ok(RebuildReport {
            symbol: symbol.to_string(),
            series,
            written_to,
        })
    }

    async fn open_gaps(&self, symbol: Option<&str>) -> Result<Vec<Gap>, MonitorError> {
        let state = self.ledger.load().await.map_err(MonitorError::Ledger)?;
        Ok(state
            .all_open()
            .into_iter()
            .filter(|gap| symbol.map_or(true, |s| gap.symbol() == s))
            .cloned()
            .collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Bar repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Ledger error: {0}")]
    Ledger(#[source] LedgerError),

    /// The ledger write failed; nothing from the tick was committed.
    #[error("Ledger commit failed: {0}")]
    Persistence(#[source] LedgerError),
}
