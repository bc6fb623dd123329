pub mod aggregation;
pub mod bar;
pub mod boundary;
pub mod data_gap;
pub mod detection;
pub mod gap;
pub mod ledger;
pub mod lifecycle;
pub mod rolling_buffer;
pub mod timeframe;

pub use aggregation::{build_derived_bar, AggregationError};
pub use bar::{Bar, BarValidationError, PRICE_SCALE};
pub use boundary::{align_to_grid, boundary, BoundaryWindow};
pub use data_gap::{missing_slots, DataGap};
pub use detection::{
    detect, detect_with, BoundaryRule, DetectionMode, DetectionWindow, ModeParseError,
};
pub use gap::{Gap, GapCandidate, GapDirection, GapId, GapStatus};
pub use ledger::{LedgerState, SeriesState};
pub use lifecycle::{GapEvent, LifecycleManager};
pub use rolling_buffer::RollingBuffer;
pub use timeframe::{Timeframe, TimeframeParseError};
