use async_trait::async_trait;
use gapwatch_application::ports::EventSink;
use gapwatch_domain::Gap;
use shaku::Component;
use tracing::info;

/// Writes every committed lifecycle transition to the log.
#[derive(Component, Default)]
#[shaku(interface = EventSink)]
pub struct TracingEventSink {}

#[async_trait]
impl EventSink for TracingEventSink {
    async fn on_gap_found(&self, gap: &Gap) {
        info!(
            id = %gap.id(),
            symbol = gap.symbol(),
            timeframe = %gap.timeframe(),
            direction = %gap.direction(),
            low = %gap.low(),
            high = %gap.high(),
            found_at = %gap.found_at(),
            "Gap found"
        );
    }

    async fn on_gap_closed(&self, gap: &Gap) {
        info!(
            id = %gap.id(),
            symbol = gap.symbol(),
            timeframe = %gap.timeframe(),
            low = %gap.low(),
            high = %gap.high(),
            closed_at = ?gap.closed_at(),
            "Gap closed"
        );
    }
}
