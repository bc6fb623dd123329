//! Three-bar gap pattern.
//!
//! The window is `(oldest, middle, newest)` and the newest bar triggers
//! detection. Each [`DetectionMode`] is a separate pattern behind the private
//! [`GapPattern`] trait; modes are never combined within one call.

use crate::{Bar, GapCandidate, GapDirection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Wick extremes for the overlap test, close for confirmation.
    #[serde(rename = "strict")]
    Strict,
    /// Candle bodies for the overlap test, ignoring wicks.
    #[default]
    #[serde(rename = "body")]
    Body,
    /// Confirms with the triggering bar's open instead of its close.
    #[serde(rename = "open")]
    Open,
    /// Direction implied by the middle bar; no antecedent colour requirement.
    #[serde(rename = "b2dir")]
    MiddleBarDirection,
}

impl DetectionMode {
    pub const ALL: [DetectionMode; 4] = [
        DetectionMode::Strict,
        DetectionMode::Body,
        DetectionMode::Open,
        DetectionMode::MiddleBarDirection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMode::Strict => "strict",
            DetectionMode::Body => "body",
            DetectionMode::Open => "open",
            DetectionMode::MiddleBarDirection => "b2dir",
        }
    }

    fn pattern(&self) -> &'static dyn GapPattern {
        match self {
            DetectionMode::Strict => &StrictPattern,
            DetectionMode::Body => &BodyPattern,
            DetectionMode::Open => &OpenPattern,
            DetectionMode::MiddleBarDirection => &MiddleBarPattern,
        }
    }
}

impl fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMode {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DetectionMode::Strict),
            "body" => Ok(DetectionMode::Body),
            "open" => Ok(DetectionMode::Open),
            "b2dir" => Ok(DetectionMode::MiddleBarDirection),
            _ => Err(ModeParseError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown detection mode: {0}")]
pub struct ModeParseError(pub String);

/// How a price exactly touching the reference level is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryRule {
    /// Touching is overlap (`<`, `>`).
    #[default]
    Strict,
    /// Touching still counts as clear (`<=`, `>=`).
    Inclusive,
}

impl BoundaryRule {
    fn below(self, value: Decimal, level: Decimal) -> bool {
        match self {
            BoundaryRule::Strict => value < level,
            BoundaryRule::Inclusive => value <= level,
        }
    }

    fn above(self, value: Decimal, level: Decimal) -> bool {
        match self {
            BoundaryRule::Strict => value > level,
            BoundaryRule::Inclusive => value >= level,
        }
    }
}

impl FromStr for BoundaryRule {
    type Err = ModeParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(BoundaryRule::Strict),
            "inclusive" => Ok(BoundaryRule::Inclusive),
            _ => Err(ModeParseError(value.to_string())),
        }
    }
}

/// Ordered triple of closed bars; never persisted.
#[derive(Debug, Clone, Copy)]
pub struct DetectionWindow<'a> {
    oldest: &'a Bar,
    middle: &'a Bar,
    newest: &'a Bar,
}

impl<'a> DetectionWindow<'a> {
    pub fn new(oldest: &'a Bar, middle: &'a Bar, newest: &'a Bar) -> Self {
        Self {
            oldest,
            middle,
            newest,
        }
    }

    /// The last three bars of `bars`, or `None` with less history.
    pub fn from_tail(bars: &'a [Bar]) -> Option<Self> {
        match bars {
            [.., oldest, middle, newest] => Some(Self::new(oldest, middle, newest)),
            _ => None,
        }
    }

    pub fn oldest(&self) -> &'a Bar {
        self.oldest
    }

    pub fn middle(&self) -> &'a Bar {
        self.middle
    }

    pub fn newest(&self) -> &'a Bar {
        self.newest
    }
}

pub fn detect(window: &DetectionWindow<'_>, mode: DetectionMode) -> Option<GapCandidate> {
    detect_with(window, mode, BoundaryRule::default())
}

pub fn detect_with(
    window: &DetectionWindow<'_>,
    mode: DetectionMode,
    rule: BoundaryRule,
) -> Option<GapCandidate> {
    let pattern = mode.pattern();
    let (direction, (low, high)) = pattern
        .up(window, rule)
        .map(|range| (GapDirection::Up, range))
        .or_else(|| pattern.down(window, rule).map(|range| (GapDirection::Down, range)))?;

    // an inclusive touch can collapse the range to a point
    if low >= high {
        return None;
    }

    Some(GapCandidate {
        direction,
        low,
        high,
        found_at: window.newest().open_time(),
    })
}

/// One detection mode. `up` looks for a gap above the triggering bar and
/// `down` mirrors it; both return `(low, high)`.
trait GapPattern: Sync {
    fn up(&self, window: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)>;
    fn down(&self, window: &DetectionWindow<'_>, rule: BoundaryRule)
        -> Option<(Decimal, Decimal)>;
}

struct StrictPattern;
struct BodyPattern;
struct OpenPattern;
struct MiddleBarPattern;

impl GapPattern for StrictPattern {
    fn up(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bearish() && rule.below(c.high(), a.low()) && rule.below(c.close(), a.low()))
            .then(|| (c.close(), a.low()))
    }

    fn down(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bullish() && rule.above(c.low(), a.high()) && rule.above(c.close(), a.high()))
            .then(|| (a.high(), c.close()))
    }
}

impl GapPattern for BodyPattern {
    fn up(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bearish()
            && rule.below(c.body_high(), a.body_low())
            && rule.below(c.close(), a.low()))
        .then(|| (c.close(), a.low()))
    }

    fn down(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bullish()
            && rule.above(c.body_low(), a.body_high())
            && rule.above(c.close(), a.high()))
        .then(|| (a.high(), c.close()))
    }
}

impl GapPattern for OpenPattern {
    fn up(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bearish() && rule.below(c.high(), a.low()) && rule.below(c.open(), a.low()))
            .then(|| (c.high(), a.low()))
    }

    fn down(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, c) = (w.oldest(), w.newest());
        (a.is_bullish() && rule.above(c.low(), a.high()) && rule.above(c.open(), a.high()))
            .then(|| (a.high(), c.low()))
    }
}

impl GapPattern for MiddleBarPattern {
    fn up(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, b, c) = (w.oldest(), w.middle(), w.newest());
        (b.is_bearish() && rule.below(c.body_high(), a.low())).then(|| (c.body_high(), a.low()))
    }

    fn down(&self, w: &DetectionWindow<'_>, rule: BoundaryRule) -> Option<(Decimal, Decimal)> {
        let (a, b, c) = (w.oldest(), w.middle(), w.newest());
        (b.is_bullish() && rule.above(c.body_low(), a.high())).then(|| (a.high(), c.body_low()))
    }
}
