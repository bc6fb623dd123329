#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use gapwatch_application::{
    BarRepository, BarSource, BarStore, BarStoreImpl, EventSink, GapLedgerRepository,
    GapMonitorService, GapMonitorServiceImpl, LedgerError, LedgerLock, MonitorConfig,
    RepositoryError, SourceError,
};
use gapwatch_domain::{Bar, DetectionMode, Gap, GapEvent, LedgerState, Timeframe, PRICE_SCALE};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

pub const SYMBOL: &str = "BTC_USDT";

pub fn hour(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(i64::from(h))
}

pub fn hourly(h: u32, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
    hourly_with_volume(h, open, high, low, close, Decimal::ONE)
}

pub fn hourly_with_volume(
    h: u32,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
) -> Bar {
    Bar::new(
        SYMBOL.to_string(),
        Timeframe::H1,
        hour(h),
        open,
        high,
        low,
        close,
        volume,
    )
    .unwrap()
}

/// Flat filler bar that never forms a pattern with its neighbours.
pub fn flat(h: u32, price: Decimal) -> Bar {
    hourly(h, price, price, price, price)
}

#[derive(Default)]
pub struct InMemoryBarRepository {
    series: Mutex<HashMap<(String, Timeframe), Vec<Bar>>>,
    appends: AtomicUsize,
}

impl InMemoryBarRepository {
    pub async fn seed(&self, bars: Vec<Bar>) {
        let mut series = self.series.lock().await;
        for bar in bars {
            series
                .entry((bar.symbol().to_string(), bar.timeframe()))
                .or_default()
                .push(bar);
        }
    }

    pub async fn stored(&self, timeframe: Timeframe) -> Vec<Bar> {
        self.series
            .lock()
            .await
            .get(&(SYMBOL.to_string(), timeframe))
            .cloned()
            .unwrap_or_default()
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BarRepository for InMemoryBarRepository {
    async fn append(&self, bar: &Bar) -> Result<(), RepositoryError> {
        // same limit as the Parquet columns
        bar.check_scale(PRICE_SCALE)
            .map_err(|e| RepositoryError::SerializationError(e.to_string()))?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.series
            .lock()
            .await
            .entry((bar.symbol().to_string(), bar.timeframe()))
            .or_default()
            .push(bar.clone());
        Ok(())
    }

    async fn load_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, RepositoryError> {
        let all = self.load_all(symbol, timeframe).await?;
        let skip = all.len().saturating_sub(n);
        Ok(all.into_iter().skip(skip).collect())
    }

    async fn load_all(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Bar>, RepositoryError> {
        Ok(self
            .series
            .lock()
            .await
            .get(&(symbol.to_string(), timeframe))
            .cloned()
            .unwrap_or_default())
    }

    async fn contains(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .load_all(symbol, timeframe)
            .await?
            .iter()
            .any(|bar| bar.open_time() == open_time))
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
    written: Mutex<HashMap<PathBuf, LedgerState>>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
    locks: AtomicUsize,
}

impl InMemoryLedger {
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn locks(&self) -> usize {
        self.locks.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }

    pub async fn written(&self, path: &Path) -> Option<LedgerState> {
        self.written.lock().await.get(path).cloned()
    }
}

#[async_trait]
impl GapLedgerRepository for InMemoryLedger {
    async fn lock(&self) -> Result<LedgerLock, LedgerError> {
        self.locks.fetch_add(1, Ordering::SeqCst);
        Ok(LedgerLock::new(()))
    }

    async fn load(&self) -> Result<LedgerState, LedgerError> {
        Ok(self.state.lock().await.clone())
    }

    async fn commit(&self, state: &LedgerState) -> Result<(), LedgerError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(LedgerError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().await = state.clone();
        Ok(())
    }

    async fn write_new(&self, path: &Path, state: &LedgerState) -> Result<(), LedgerError> {
        let mut written = self.written.lock().await;
        if written.contains_key(path) {
            return Err(LedgerError::AlreadyExists(path.to_path_buf()));
        }
        written.insert(path.to_path_buf(), state.clone());
        Ok(())
    }
}

/// Replays a scripted feed; `get_recent` returns the newest `n` scripted
/// bars of the requested timeframe.
#[derive(Default)]
pub struct StubBarSource {
    bars: Mutex<Vec<Bar>>,
    fail: AtomicBool,
}

impl StubBarSource {
    pub async fn publish(&self, bars: Vec<Bar>) {
        self.bars.lock().await.extend(bars);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BarSource for StubBarSource {
    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("connection reset".to_string()));
        }
        let matching: Vec<Bar> = self
            .bars
            .lock()
            .await
            .iter()
            .filter(|bar| bar.symbol() == symbol && bar.timeframe() == timeframe)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(n);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<GapEvent>>,
}

impl RecordingEventSink {
    pub async fn events(&self) -> Vec<GapEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn on_gap_found(&self, gap: &Gap) {
        self.events.lock().await.push(GapEvent::Found(gap.clone()));
    }

    async fn on_gap_closed(&self, gap: &Gap) {
        self.events.lock().await.push(GapEvent::Closed(gap.clone()));
    }
}

pub struct Harness {
    pub repository: Arc<InMemoryBarRepository>,
    pub ledger: Arc<InMemoryLedger>,
    pub source: Arc<StubBarSource>,
    pub sink: Arc<RecordingEventSink>,
    pub store: Arc<dyn BarStore>,
    pub service: Arc<dyn GapMonitorService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryBarRepository::default()),
            Arc::new(InMemoryLedger::default()),
            Arc::new(StubBarSource::default()),
        )
    }

    /// Fresh store, aggregator and sink over the given persisted state, as
    /// after a process restart.
    pub fn with_parts(
        repository: Arc<InMemoryBarRepository>,
        ledger: Arc<InMemoryLedger>,
        source: Arc<StubBarSource>,
    ) -> Self {
        let config = MonitorConfig {
            mode: DetectionMode::Strict,
            ..MonitorConfig::default()
        };
        let sink = Arc::new(RecordingEventSink::default());
        let store: Arc<dyn BarStore> = Arc::new(BarStoreImpl::new(
            repository.clone(),
            config.cache_size,
            config.grid_tolerance_secs,
        ));
        let service: Arc<dyn GapMonitorService> = Arc::new(GapMonitorServiceImpl::new(
            source.clone(),
            store.clone(),
            repository.clone(),
            ledger.clone(),
            sink.clone(),
            config,
        ));
        Self {
            repository,
            ledger,
            source,
            sink,
            store,
            service,
        }
    }

    pub fn restart(&self) -> Self {
        Self::with_parts(
            self.repository.clone(),
            self.ledger.clone(),
            self.source.clone(),
        )
    }
}
