use chrono::{DateTime, Duration, Utc};
use gapwatch_domain::Timeframe;

/// Minutes past the bar boundary at which a timeframe's tick fires, leaving
/// the upstream feed time to publish the closed bar.
fn settle_minutes(timeframe: Timeframe) -> i64 {
    match timeframe {
        Timeframe::H1 => 2,
        Timeframe::H4 => 6,
        Timeframe::D1 => 12,
    }
}

/// First fire time of `timeframe` strictly after `now`.
pub fn next_fire(timeframe: Timeframe, now: DateTime<Utc>) -> DateTime<Utc> {
    let period = timeframe.seconds();
    let offset = settle_minutes(timeframe) * 60;
    let since = now.timestamp() - offset;
    let next = (since.div_euclid(period) + 1) * period + offset;
    DateTime::from_timestamp(next, 0).unwrap_or(now + timeframe.duration())
}

/// The earliest upcoming fire time and every timeframe due at that instant,
/// in the order given.
pub fn next_due(
    timeframes: &[Timeframe],
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, Vec<Timeframe>)> {
    let at = timeframes.iter().map(|tf| next_fire(*tf, now)).min()?;
    let due = timeframes
        .iter()
        .copied()
        .filter(|tf| next_fire(*tf, now) == at)
        .collect();
    Some((at, due))
}

pub fn until(at: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    (at - now).max(Duration::zero()).to_std().unwrap_or_default()
}
