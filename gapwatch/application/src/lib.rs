pub mod aggregator;
pub mod bar_store;
pub mod config;
pub mod ports;
pub mod rebuild;
pub mod services;
pub mod summary;

pub use aggregator::{AggregationOutcome, BarAggregator};
pub use bar_store::{AppendOutcome, BarStore, BarStoreImpl, RejectReason};
pub use config::{ConfigError, MonitorConfig};
pub use ports::{
    BarRepository, BarSource, EventSink, GapLedgerRepository, LedgerError, LedgerLock,
    RepositoryError, SourceError,
};
pub use rebuild::{replay_series, RebuildReport, SeriesRebuild};
pub use services::{GapMonitorService, GapMonitorServiceImpl, MonitorError, TickReport};
pub use summary::{scan_candidates, DirectionFilter, GapSummary};
