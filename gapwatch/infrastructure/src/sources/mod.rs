pub mod mock;

pub use mock::{MockBarSource, MockBarSourceParameters};
