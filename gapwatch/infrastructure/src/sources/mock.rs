use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gapwatch_application::ports::{BarSource, SourceError};
use gapwatch_domain::{Bar, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use shaku::Component;
use tracing::debug;

/// Synthetic candle feed. Every bar is a pure function of
/// (symbol, timeframe, open_time), so repeated polls agree on history and
/// the newest bar returned is always the last fully closed one.
#[derive(Component)]
#[shaku(interface = BarSource)]
pub struct MockBarSource {
    #[shaku(default = 50_000.0)]
    base_price: f64,
    /// Largest relative move of the anchor price away from `base_price`.
    #[shaku(default = 0.05)]
    volatility: f64,
}

impl MockBarSource {
    pub fn new(base_price: f64, volatility: f64) -> Self {
        Self {
            base_price,
            volatility,
        }
    }

    /// The `n` bars ending with the one opened at `last_open`, oldest first.
    pub fn bars_ending_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
        last_open: DateTime<Utc>,
    ) -> Result<Vec<Bar>, SourceError> {
        (0..n)
            .rev()
            .map(|back| {
                let open_time = last_open - timeframe.duration() * back as i32;
                self.generate_bar(symbol, timeframe, open_time)
            })
            .collect()
    }

    fn anchor_price(&self, ts: DateTime<Utc>) -> f64 {
        let hours = ts.timestamp() as f64 / 3_600.0;
        let swing = (hours / 37.0).sin() * 0.6 + (hours / 11.0).sin() * 0.4;
        self.base_price * (1.0 + self.volatility * swing)
    }

    fn rng_for(symbol: &str, timeframe: Timeframe, ts: DateTime<Utc>) -> StdRng {
        let symbol_seed = symbol
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |acc, b| {
                (acc ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        let seed = symbol_seed ^ (ts.timestamp() as u64).rotate_left(17) ^ timeframe.seconds() as u64;
        StdRng::seed_from_u64(seed)
    }

    fn generate_bar(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        open_time: DateTime<Utc>,
    ) -> Result<Bar, SourceError> {
        let mut rng = Self::rng_for(symbol, timeframe, open_time);

        // occasional jump away from the previous close leaves room for gaps
        let jump = if rng.random_range(0..8) == 0 {
            rng.random_range(-0.01..0.01)
        } else {
            0.0
        };
        let open = self.anchor_price(open_time) * (1.0 + jump);
        let close = self.anchor_price(open_time + timeframe.duration());
        let wick_up = rng.random_range(0.0..0.004);
        let wick_down = rng.random_range(0.0..0.004);
        let high = open.max(close) * (1.0 + wick_up);
        let low = open.min(close) * (1.0 - wick_down);
        let volume = rng.random_range(1.0..250.0);

        Bar::new(
            symbol.to_string(),
            timeframe,
            open_time,
            to_cents(open)?,
            to_cents(high)?,
            to_cents(low)?,
            to_cents(close)?,
            to_cents(volume)?,
        )
        .map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

fn to_cents(value: f64) -> Result<Decimal, SourceError> {
    Decimal::from_f64(value)
        .map(|d| d.round_dp(2))
        .ok_or_else(|| SourceError::Malformed(format!("non-finite price {}", value)))
}

fn last_closed_open(timeframe: Timeframe, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let step = timeframe.seconds();
    let current = now.timestamp().div_euclid(step) * step;
    DateTime::from_timestamp(current - step, 0)
}

#[async_trait]
impl BarSource for MockBarSource {
    async fn get_recent(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        n: usize,
    ) -> Result<Vec<Bar>, SourceError> {
        let last_open = last_closed_open(timeframe, Utc::now())
            .ok_or_else(|| SourceError::Unavailable("clock out of range".to_string()))?;
        debug!(
            "Mock source: {} {} bars of {} ending {}",
            n, timeframe, symbol, last_open
        );
        self.bars_ending_at(symbol, timeframe, n, last_open)
    }
}
