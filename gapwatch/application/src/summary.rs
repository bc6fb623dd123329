use gapwatch_domain::{
    detect_with, Bar, BoundaryRule, DetectionMode, DetectionWindow, GapCandidate, GapDirection,
    Timeframe,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionFilter {
    #[default]
    Both,
    Up,
    Down,
}

impl DirectionFilter {
    pub fn admits(&self, direction: GapDirection) -> bool {
        match self {
            DirectionFilter::Both => true,
            DirectionFilter::Up => direction == GapDirection::Up,
            DirectionFilter::Down => direction == GapDirection::Down,
        }
    }
}

impl fmt::Display for DirectionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DirectionFilter::Both => "both",
            DirectionFilter::Up => "up",
            DirectionFilter::Down => "down",
        })
    }
}

impl FromStr for DirectionFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(DirectionFilter::Both),
            "up" => Ok(DirectionFilter::Up),
            "down" => Ok(DirectionFilter::Down),
            other => Err(format!("Unknown direction filter: {}", other)),
        }
    }
}

/// Read-only listing of the patterns present in the recent bars of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapSummary {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub mode: DetectionMode,
    pub filter: DirectionFilter,
    pub bars_scanned: usize,
    pub candidates: Vec<GapCandidate>,
}

/// Slides the three-bar window over `bars` (oldest first) and returns every
/// admitted candidate in bar order.
pub fn scan_candidates(
    bars: &[Bar],
    mode: DetectionMode,
    rule: BoundaryRule,
    filter: DirectionFilter,
) -> Vec<GapCandidate> {
    bars.windows(3)
        .filter_map(DetectionWindow::from_tail)
        .filter_map(|window| detect_with(&window, mode, rule))
        .filter(|candidate| filter.admits(candidate.direction))
        .collect()
}
