use crate::Timeframe;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Half-open aggregation window `[start, end)` on a timeframe's UTC grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeframe: Timeframe,
}

impl BoundaryWindow {
    pub fn containing(ts: DateTime<Utc>, timeframe: Timeframe) -> Self {
        let (start, end) = boundary(ts, timeframe);
        Self {
            start,
            end,
            timeframe,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Expected open times of `base` bars covering this window.
    pub fn slots(&self, base: Timeframe) -> Vec<DateTime<Utc>> {
        let mut result = Vec::new();
        let mut current = self.start;
        let step = base.duration();

        while current < self.end {
            result.push(current);
            current += step;
        }

        result
    }

    pub fn is_last_slot(&self, ts: DateTime<Utc>, base: Timeframe) -> bool {
        self.contains(ts) && ts + base.duration() >= self.end
    }

    pub fn next(&self) -> Self {
        Self::containing(self.end, self.timeframe)
    }
}

/// Maps `ts` to the start and end of its containing window.
///
/// Windows are floored on the UNIX epoch, which puts 4-hour windows at
/// 00:00, 04:00, ... and daily windows at 00:00 UTC.
pub fn boundary(ts: DateTime<Utc>, timeframe: Timeframe) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = ts.timestamp().rem_euclid(timeframe.seconds());
    let start = ts
        - Duration::seconds(offset)
        - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()));
    (start, start + timeframe.duration())
}

/// Snaps `ts` to the nearest grid point when it lies within `tolerance`.
pub fn align_to_grid(
    ts: DateTime<Utc>,
    timeframe: Timeframe,
    tolerance: Duration,
) -> Option<DateTime<Utc>> {
    if timeframe.is_aligned(ts) {
        return Some(ts);
    }

    let (floor, ceil) = boundary(ts, timeframe);
    if ts - floor <= tolerance {
        Some(floor)
    } else if ceil - ts <= tolerance {
        Some(ceil)
    } else {
        None
    }
}
