mod common;

use std::sync::Arc;

use common::{flat, hour, hourly_with_volume, InMemoryBarRepository, SYMBOL};
use gapwatch_application::{
    AggregationOutcome, AppendOutcome, BarAggregator, BarStore, BarStoreImpl,
};
use gapwatch_domain::{Bar, Timeframe};
use rust_decimal_macros::dec;

fn four_hour_window() -> Vec<Bar> {
    vec![
        hourly_with_volume(0, dec!(100), dec!(102), dec!(99), dec!(101), dec!(1.5)),
        hourly_with_volume(1, dec!(101), dec!(101.5), dec!(98), dec!(99), dec!(2)),
        hourly_with_volume(2, dec!(99), dec!(104), dec!(99), dec!(103), dec!(3)),
        hourly_with_volume(3, dec!(103), dec!(103.5), dec!(101), dec!(102), dec!(0.5)),
    ]
}

async fn feed(
    aggregator: &mut BarAggregator,
    store: &BarStoreImpl,
    bars: Vec<Bar>,
) -> Vec<AggregationOutcome> {
    let mut outcomes = Vec::new();
    for bar in bars {
        if let AppendOutcome::Accepted(bar) = store.append(bar).await.unwrap() {
            outcomes.extend(aggregator.on_base_bar_appended(store, &bar).await.unwrap());
        }
    }
    outcomes
}

fn setup() -> (Arc<InMemoryBarRepository>, BarStoreImpl, BarAggregator) {
    let repository = Arc::new(InMemoryBarRepository::default());
    let store = BarStoreImpl::new(repository.clone(), 50, 0);
    let aggregator = BarAggregator::new(Timeframe::H1, vec![Timeframe::H4]);
    (repository, store, aggregator)
}

#[tokio::test]
async fn complete_window_emits_one_derived_bar() {
    let (repository, store, mut aggregator) = setup();

    let outcomes = feed(&mut aggregator, &store, four_hour_window()).await;

    assert_eq!(outcomes.len(), 1);
    let AggregationOutcome::Emitted(derived) = &outcomes[0] else {
        panic!("expected a derived bar, got {:?}", outcomes[0]);
    };
    assert_eq!(derived.timeframe(), Timeframe::H4);
    assert_eq!(derived.open_time(), hour(0));
    assert_eq!(derived.open(), dec!(100));
    assert_eq!(derived.close(), dec!(102));
    assert_eq!(derived.high(), dec!(104));
    assert_eq!(derived.low(), dec!(98));
    assert_eq!(derived.volume(), dec!(7));
    assert_eq!(repository.stored(Timeframe::H4).await.len(), 1);
}

#[tokio::test]
async fn missing_middle_slot_withholds_window() {
    let (repository, store, mut aggregator) = setup();
    let mut bars = four_hour_window();
    bars.remove(2);

    let outcomes = feed(&mut aggregator, &store, bars).await;

    assert_eq!(outcomes.len(), 1);
    let AggregationOutcome::Withheld(gap) = &outcomes[0] else {
        panic!("expected the window to be withheld");
    };
    assert_eq!(gap.missing(), &[hour(2)]);
    assert!(repository.stored(Timeframe::H4).await.is_empty());
}

#[tokio::test]
async fn missing_last_slot_is_reported_when_next_window_starts() {
    let (repository, store, mut aggregator) = setup();
    let mut bars = four_hour_window();
    bars.pop();

    assert!(feed(&mut aggregator, &store, bars).await.is_empty());

    let outcomes = feed(&mut aggregator, &store, vec![flat(4, dec!(102))]).await;
    assert_eq!(outcomes.len(), 1);
    let AggregationOutcome::Withheld(gap) = &outcomes[0] else {
        panic!("expected the previous window to be withheld");
    };
    assert_eq!(gap.window().start(), hour(0));
    assert_eq!(gap.missing(), &[hour(3)]);
    assert!(repository.stored(Timeframe::H4).await.is_empty());

    // aggregation resumes with the next complete window
    let outcomes = feed(
        &mut aggregator,
        &store,
        (5..8).map(|h| flat(h, dec!(102))).collect(),
    )
    .await;
    assert!(matches!(
        outcomes.as_slice(),
        [AggregationOutcome::Emitted(bar)] if bar.open_time() == hour(4)
    ));
}

#[tokio::test]
async fn same_complete_window_twice_emits_once() {
    let (repository, store, mut aggregator) = setup();
    feed(&mut aggregator, &store, four_hour_window()).await;

    let mut restarted = BarAggregator::new(Timeframe::H1, vec![Timeframe::H4]);
    let last = four_hour_window().pop().unwrap();
    let outcomes = restarted.on_base_bar_appended(&store, &last).await.unwrap();

    assert!(matches!(
        outcomes.as_slice(),
        [AggregationOutcome::AlreadyPresent(window)] if window.start() == hour(0)
    ));
    assert_eq!(repository.stored(Timeframe::H4).await.len(), 1);
    let derived = store.get_recent(SYMBOL, Timeframe::H4, 5).await.unwrap();
    assert_eq!(derived.len(), 1);
}

#[tokio::test]
async fn restart_mid_window_resumes_from_store() {
    let (repository, store, mut aggregator) = setup();
    let mut bars = four_hour_window();
    let last = bars.pop().unwrap();
    feed(&mut aggregator, &store, bars).await;

    let store = BarStoreImpl::new(repository.clone(), 50, 0);
    let mut restarted = BarAggregator::new(Timeframe::H1, vec![Timeframe::H4]);
    let outcomes = feed(&mut restarted, &store, vec![last]).await;

    assert!(matches!(outcomes.as_slice(), [AggregationOutcome::Emitted(_)]));
}

#[tokio::test]
async fn derived_timeframes_not_built_from_base_are_ignored() {
    let aggregator = BarAggregator::new(Timeframe::H4, vec![Timeframe::H1, Timeframe::D1]);
    assert_eq!(aggregator.derived(), &[Timeframe::D1]);
}
