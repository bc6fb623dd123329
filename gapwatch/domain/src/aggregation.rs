use crate::{Bar, BarValidationError, BoundaryWindow};
use rust_decimal::Decimal;

/// Folds a complete, ordered set of base bars into one bar of the window's
/// timeframe stamped at the window start.
pub fn build_derived_bar(window: &BoundaryWindow, bars: &[Bar]) -> Result<Bar, AggregationError> {
    let (first, last) = match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Err(AggregationError::Empty),
    };

    if let Some(stray) = bars.iter().find(|bar| !window.contains(bar.open_time())) {
        return Err(AggregationError::OutsideWindow(stray.open_time().to_rfc3339()));
    }

    let high = bars.iter().map(Bar::high).fold(first.high(), Decimal::max);
    let low = bars.iter().map(Bar::low).fold(first.low(), Decimal::min);
    let volume = bars.iter().map(Bar::volume).sum();

    Ok(Bar::new(
        first.symbol().to_string(),
        window.timeframe(),
        window.start(),
        first.open(),
        high,
        low,
        last.close(),
        volume,
    )?)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    #[error("No bars to aggregate")]
    Empty,
    #[error("Bar at {0} lies outside the aggregation window")]
    OutsideWindow(String),
    #[error("Derived bar is invalid: {0}")]
    Invalid(#[from] BarValidationError),
}
