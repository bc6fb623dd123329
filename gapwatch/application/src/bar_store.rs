use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gapwatch_domain::{align_to_grid, Bar, BarValidationError, RollingBuffer, Timeframe, PRICE_SCALE};
use shaku::{Component, Interface};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ports::{BarRepository, RepositoryError};

type SeriesKey = (String, Timeframe);

#[async_trait]
pub trait BarStore: Interface {
    /// Persists and caches `bar` unless it is malformed, off-grid, older
    /// than the series head, or already stored.
    async fn append(&self, bar: Bar) -> Result<AppendOutcome, RepositoryError>;

    /// The last `n` bars of the series, oldest first. `n` is capped at the
    /// cache size; fewer are returned when history is short.
    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, RepositoryError>;

    fn cache_size(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored bar, snapped onto the grid if it arrived within tolerance.
    Accepted(Bar),
    Duplicate,
    Rejected(RejectReason),
}

impl AppendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AppendOutcome::Accepted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("Malformed bar: {0}")]
    Malformed(#[from] BarValidationError),

    #[error("Open time {0} is off the timeframe grid")]
    Misaligned(DateTime<Utc>),

    #[error("Open time {open_time} is older than the latest stored bar {latest}")]
    OutOfOrder {
        open_time: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

#[derive(Component)]
#[shaku(interface = BarStore)]
pub struct BarStoreImpl {
    #[shaku(inject)]
    repository: Arc<dyn BarRepository>,

    #[shaku(default = 200)]
    cache_size: usize,

    #[shaku(default = 0)]
    grid_tolerance_secs: i64,

    #[shaku(default = Mutex::new(HashMap::new()))]
    series: Mutex<HashMap<SeriesKey, RollingBuffer<Bar>>>,
}

impl BarStoreImpl {
    pub fn new(
        repository: Arc<dyn BarRepository>,
        cache_size: usize,
        grid_tolerance_secs: i64,
    ) -> Self {
        Self {
            repository,
            cache_size: cache_size.max(1),
            grid_tolerance_secs: grid_tolerance_secs.max(0),
            series: Mutex::new(HashMap::new()),
        }
    }

    // Loads the persisted tail on first touch so a restart keeps history.
    async fn warm<'a>(
        &self,
        series: &'a mut HashMap<SeriesKey, RollingBuffer<Bar>>,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<&'a mut RollingBuffer<Bar>, RepositoryError> {
        let key = (symbol.to_string(), timeframe);
        if !series.contains_key(&key) {
            let mut buffer = RollingBuffer::new(self.cache_size);
            for bar in self
                .repository
                .load_recent(symbol, timeframe, self.cache_size)
                .await?
            {
                buffer.push(bar);
            }
            series.insert(key.clone(), buffer);
        }
        Ok(series
            .entry(key)
            .or_insert_with(|| RollingBuffer::new(self.cache_size)))
    }
}

#[async_trait]
impl BarStore for BarStoreImpl {
    async fn append(&self, bar: Bar) -> Result<AppendOutcome, RepositoryError> {
        // the series store keeps PRICE_SCALE places; anything finer cannot be persisted
        if let Err(e) = bar.validate().and_then(|_| bar.check_scale(PRICE_SCALE)) {
            warn!("Rejected malformed {} {} bar: {}", bar.symbol(), bar.timeframe(), e);
            return Ok(AppendOutcome::Rejected(RejectReason::Malformed(e)));
        }

        let tolerance = Duration::seconds(self.grid_tolerance_secs);
        let bar = match align_to_grid(bar.open_time(), bar.timeframe(), tolerance) {
            Some(aligned) if aligned == bar.open_time() => bar,
            Some(aligned) => bar.realigned(aligned),
            None => {
                warn!(
                    "Rejected {} {} bar at {}: off grid",
                    bar.symbol(),
                    bar.timeframe(),
                    bar.open_time()
                );
                return Ok(AppendOutcome::Rejected(RejectReason::Misaligned(
                    bar.open_time(),
                )));
            }
        };

        let mut series = self.series.lock().await;
        let buffer = self.warm(&mut series, bar.symbol(), bar.timeframe()).await?;

        if buffer.iter().any(|stored| stored.open_time() == bar.open_time()) {
            debug!("Duplicate {} {} bar at {}", bar.symbol(), bar.timeframe(), bar.open_time());
            return Ok(AppendOutcome::Duplicate);
        }

        if let Some(latest) = buffer.last().map(Bar::open_time) {
            if bar.open_time() < latest {
                let oldest_cached = buffer.first().map(Bar::open_time).unwrap_or(latest);
                if bar.open_time() < oldest_cached
                    && self
                        .repository
                        .contains(bar.symbol(), bar.timeframe(), bar.open_time())
                        .await?
                {
                    debug!(
                        "Duplicate {} {} bar at {} (persisted)",
                        bar.symbol(),
                        bar.timeframe(),
                        bar.open_time()
                    );
                    return Ok(AppendOutcome::Duplicate);
                }
                warn!(
                    "Rejected {} {} bar at {}: older than {}",
                    bar.symbol(),
                    bar.timeframe(),
                    bar.open_time(),
                    latest
                );
                return Ok(AppendOutcome::Rejected(RejectReason::OutOfOrder {
                    open_time: bar.open_time(),
                    latest,
                }));
            }
        }

        self.repository.append(&bar).await?;
        buffer.push(bar.clone());
        Ok(AppendOutcome::Accepted(bar))
    }

    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, RepositoryError> {
        let mut series = self.series.lock().await;
        let buffer = self.warm(&mut series, symbol, timeframe).await?;
        Ok(buffer.last_n(n.min(self.cache_size)))
    }

    fn cache_size(&self) -> usize {
        self.cache_size
    }
}
