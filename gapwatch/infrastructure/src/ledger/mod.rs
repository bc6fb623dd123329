pub mod json;

pub use json::{JsonGapLedger, JsonGapLedgerParameters};
