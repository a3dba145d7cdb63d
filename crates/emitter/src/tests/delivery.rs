//! Draining behavior.

use super::harness::{event, test_config, wait_until, TestHarness};
use crate::{EmissionEvent, EmitterState};
use event_store::{EventStore, MemoryEventStore, SqliteEventStore, StoreLimits};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn backlog_drains_in_fifo_batches_without_waiting_for_ticks() {
    let harness = TestHarness::new(test_config());
    for n in 0..25 {
        harness.store.enqueue(&event(n)).unwrap();
    }

    harness.emitter.start();
    // The tick is an hour away; only draining can empty the store this fast.
    wait_until(Duration::from_secs(1), || harness.store.count().unwrap() == 0).await;

    let batches = harness.dispatcher.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0], (1..=10).collect::<Vec<i64>>());
    assert_eq!(batches[1], (11..=20).collect::<Vec<i64>>());
    assert_eq!(batches[2], (21..=25).collect::<Vec<i64>>());
    assert_eq!(harness.emitter.stats().events_sent, 25);
    assert_eq!(harness.emitter.stats().dispatches, 3);

    harness.emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn enqueue_on_idle_emitter_wakes_it() {
    let harness = TestHarness::new(test_config());
    harness.emitter.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.dispatcher.received_count(), 0);

    harness.track(&event(1));
    wait_until(Duration::from_secs(1), || {
        harness.dispatcher.received_count() == 1
    })
    .await;
    assert!(harness.pending_ids().is_empty());

    harness.track(&event(2));
    wait_until(Duration::from_secs(1), || {
        harness.dispatcher.received_count() == 2
    })
    .await;

    harness.emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timer_tick_picks_up_events_enqueued_without_notice() {
    let mut config = test_config();
    config.tick_interval_ms = 5_000;
    let harness = TestHarness::new(config);
    harness.emitter.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Written straight to the store, bypassing the wake.
    harness.store.enqueue(&event(1)).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.dispatcher.received_count(), 0);

    wait_until(Duration::from_secs(10), || {
        harness.dispatcher.received_count() == 1
    })
    .await;
    harness.emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flush_advances_immediately() {
    let harness = TestHarness::new(test_config());
    harness.emitter.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness.store.enqueue(&event(1)).unwrap();
    harness.emitter.flush();
    wait_until(Duration::from_secs(1), || {
        harness.dispatcher.received_count() == 1
    })
    .await;
    harness.emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn events_persisted_before_start_are_sent_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.sqlite");
    {
        let store = SqliteEventStore::open(&path, "test", StoreLimits::unbounded()).unwrap();
        store.enqueue(&event(1)).unwrap();
        store.enqueue(&event(2)).unwrap();
    }

    let store: Arc<dyn EventStore> =
        Arc::new(SqliteEventStore::open(&path, "test", StoreLimits::unbounded()).unwrap());
    let dispatcher = Arc::new(super::harness::MockDispatcher::new());
    let emitter = crate::Emitter::new(
        store.clone(),
        dispatcher.clone(),
        &test_config(),
        Arc::new(crate::NullSink),
    )
    .unwrap();
    emitter.start();

    wait_until(Duration::from_secs(1), || store.count().unwrap() == 0).await;
    assert_eq!(dispatcher.batches(), vec![vec![1, 2]]);
    emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn delivered_events_are_never_selected_again() {
    let harness = TestHarness::new(test_config());
    for n in 0..3 {
        harness.store.enqueue(&event(n)).unwrap();
    }
    harness.emitter.start();
    wait_until(Duration::from_secs(1), || harness.store.count().unwrap() == 0).await;

    harness.track(&event(3));
    wait_until(Duration::from_secs(1), || {
        harness.dispatcher.received_count() == 2
    })
    .await;

    let batches = harness.dispatcher.batches();
    assert_eq!(batches, vec![vec![1, 2, 3], vec![4]]);
    assert!(harness
        .sink
        .events()
        .iter()
        .all(|e| matches!(e, EmissionEvent::BatchDelivered { .. })));
    assert_eq!(harness.emitter.state(), EmitterState::Idle);
    harness.emitter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn namespaces_emit_independently() {
    let a = TestHarness::with_store(Arc::new(MemoryEventStore::new("a")), test_config());
    let b = TestHarness::with_store(Arc::new(MemoryEventStore::new("b")), test_config());
    b.dispatcher
        .set_default_response(super::harness::MockResponse::Retry);

    a.emitter.start();
    b.emitter.start();
    a.track(&event(1));
    b.track(&event(1));

    wait_until(Duration::from_secs(1), || a.store.count().unwrap() == 0).await;
    assert_eq!(b.store.count().unwrap(), 1);

    a.emitter.shutdown().await;
    b.emitter.shutdown().await;
}
