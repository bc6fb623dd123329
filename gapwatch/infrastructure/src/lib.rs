pub mod ledger;
pub mod repositories;
pub mod sinks;
pub mod sources;

pub use ledger::JsonGapLedger;
pub use repositories::ParquetBarRepository;
pub use sinks::TracingEventSink;
pub use sources::MockBarSource;
