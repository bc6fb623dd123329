use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gapwatch_domain::{Bar, Gap, LedgerState, Timeframe};
use shaku::Interface;
use std::any::Any;
use std::path::{Path, PathBuf};

/// Append-only persisted bar series, one per (symbol, timeframe).
#[async_trait]
pub trait BarRepository: Interface {
    async fn append(&self, bar: &Bar) -> Result<(), RepositoryError>;

    /// The newest `n` persisted bars, oldest first.
    async fn load_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, RepositoryError>;

    async fn load_all(&self, symbol: &str, timeframe: Timeframe)
        -> Result<Vec<Bar>, RepositoryError>;

    async fn contains(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

/// Single persisted gap ledger. `commit` replaces the whole document
/// atomically; a reader sees the old state or the new one, never a mix.
///
/// Writers hold [`GapLedgerRepository::lock`] from `load` through `commit`
/// so that two processes never allocate from the same counter.
#[async_trait]
pub trait GapLedgerRepository: Interface {
    /// Waits for exclusive write access. Released when the guard drops.
    async fn lock(&self) -> Result<LedgerLock, LedgerError>;

    async fn load(&self) -> Result<LedgerState, LedgerError>;

    async fn commit(&self, state: &LedgerState) -> Result<(), LedgerError>;

    /// Writes `state` to a fresh ledger file at `path`, failing if one exists.
    async fn write_new(&self, path: &Path, state: &LedgerState) -> Result<(), LedgerError>;
}

/// Held write access to a ledger; whatever backs it is released on drop.
pub struct LedgerLock {
    _held: Box<dyn Any + Send + Sync>,
}

impl LedgerLock {
    pub fn new<T: Send + Sync + 'static>(held: T) -> Self {
        Self {
            _held: Box::new(held),
        }
    }
}

impl std::fmt::Debug for LedgerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LedgerLock")
    }
}

/// Upstream candle feed.
#[async_trait]
pub trait BarSource: Interface {
    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, SourceError>;
}

/// Notification boundary. Called only after the ledger change is committed.
#[async_trait]
pub trait EventSink: Interface {
    async fn on_gap_found(&self, gap: &Gap);
    async fn on_gap_closed(&self, gap: &Gap);
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Corrupt bar record in {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ledger format error: {0}")]
    FormatError(#[from] serde_json::Error),

    #[error("Ledger already exists: {0}")]
    AlreadyExists(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed candle from source: {0}")]
    Malformed(String),
}
