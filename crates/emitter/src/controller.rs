//! Emission controller.
//!
//! One background task per namespace drives batches from the store to the
//! dispatcher. The task owns the retry state; the [`Emitter`] handle only
//! flips flags and wakes it.
//!
//! ```text
//!            wake / tick               batch selected
//!   ┌──────┐ ─────────────▶ select ─────────────────▶ ┌─────────┐
//!   │ Idle │                                          │ Sending │
//!   └──────┘ ◀───────── success, store drained ─────── └─────────┘
//!      ▲                                                   │ retryable
//!      │             delay elapsed                         ▼
//!      └───────────────────────────────────────── ┌────────────┐
//!                                                 │ BackingOff │
//!                                                 └────────────┘
//! ```
//!
//! Successes keep draining without waiting for the next tick. Shutdown lets
//! an in-flight dispatch finish and apply its outcome, and cancels any
//! pending wait.

use crate::backoff::Backoff;
use crate::config::{EmitterConfig, OversizedPolicy};
use crate::dispatcher::{CollectorTarget, DispatchOutcome, Dispatcher};
use crate::error::EmitterResult;
use crate::selector::BatchSelector;
use crate::sink::{DropReason, EmissionEvent, EmissionSink, EmitterStats, StatsSnapshot};
use event_store::{EventStore, StoreError, StoreId, StoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where the emission loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Sending,
    BackingOff,
    /// Shut down.
    Stopped,
    /// The store is corrupt; nothing more will be sent.
    Halted,
}

/// Store changes made for one dispatch outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedOutcome {
    pub delivered: Vec<StoreId>,
    pub retained: Vec<StoreId>,
    pub dropped: Vec<StoreId>,
    pub drop_reason: Option<String>,
    /// Whether the loop should back off before the next attempt.
    pub back_off: bool,
}

/// Applies a dispatch outcome to the store.
///
/// Delivered and rejected ids are removed. Failed ids of a partial result are
/// left in place. A retryable failure removes nothing. A partial result that
/// delivered nothing but still has events to retry backs off like a
/// retryable failure.
pub fn apply_outcome(
    store: &dyn EventStore,
    outcome: &DispatchOutcome,
) -> StoreResult<AppliedOutcome> {
    let mut applied = AppliedOutcome::default();

    match outcome {
        DispatchOutcome::Delivered(ids) => {
            remove_ids(store, ids)?;
            applied.delivered = ids.clone();
        }
        DispatchOutcome::PartialFailure {
            succeeded,
            failed,
            rejected,
        } => {
            let mut removed = succeeded.clone();
            removed.extend_from_slice(rejected);
            remove_ids(store, &removed)?;

            applied.delivered = succeeded.clone();
            applied.retained = failed.clone();
            applied.dropped = rejected.clone();
            if !rejected.is_empty() {
                applied.drop_reason = Some("rejected by collector".to_string());
            }
            applied.back_off = succeeded.is_empty() && !failed.is_empty();
        }
        DispatchOutcome::RetryableFailure { .. } => {
            applied.back_off = true;
        }
        DispatchOutcome::TerminalFailure { store_ids, reason } => {
            remove_ids(store, store_ids)?;
            applied.dropped = store_ids.clone();
            applied.drop_reason = Some(reason.clone());
        }
    }

    Ok(applied)
}

fn remove_ids(store: &dyn EventStore, ids: &[StoreId]) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    if !store.remove_many(ids)? {
        debug!(
            namespace = %store.namespace(),
            count = ids.len(),
            "Some acknowledged events were already gone"
        );
    }
    Ok(())
}

/// What the loop does after a drain pass.
enum Cycle {
    Idle,
    BackOff(Duration),
    Halt,
}

struct Shared {
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn Dispatcher>,
    sink: Arc<dyn EmissionSink>,
    target: CollectorTarget,
    selector: BatchSelector,
    backoff: Backoff,
    oversized_policy: OversizedPolicy,
    tick_interval: Duration,
    stats: EmitterStats,
    state: Mutex<EmitterState>,
    wake: Notify,
    paused: AtomicBool,
    online: AtomicBool,
    queue_empty: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl Shared {
    fn namespace(&self) -> &str {
        self.store.namespace()
    }

    fn can_advance(&self) -> bool {
        !self.paused.load(Ordering::SeqCst) && self.online.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: EmitterState) {
        *self.state.lock() = state;
    }

    fn register_failure(&self) -> Duration {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.backoff.delay(failures);
        self.stats.add_retry();
        self.sink.record(EmissionEvent::BackoffScheduled {
            namespace: self.namespace().to_string(),
            consecutive_failures: failures,
            delay,
        });
        delay
    }

    fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    fn halt(&self, error: &StoreError) {
        error!(namespace = %self.namespace(), error = %error, "Event store corrupt, halting emitter");
        self.sink.record(EmissionEvent::NamespaceHalted {
            namespace: self.namespace().to_string(),
            error: error.to_string(),
        });
    }

    fn report(&self, applied: &AppliedOutcome) {
        let namespace = self.namespace().to_string();
        if !applied.delivered.is_empty() {
            self.stats.add_sent(applied.delivered.len());
            self.sink.record(EmissionEvent::BatchDelivered {
                namespace: namespace.clone(),
                store_ids: applied.delivered.clone(),
            });
        }
        if !applied.retained.is_empty() {
            self.stats.add_retained(applied.retained.len());
            self.sink.record(EmissionEvent::EventsRetained {
                namespace: namespace.clone(),
                store_ids: applied.retained.clone(),
            });
        }
        if !applied.dropped.is_empty() {
            let reason = applied
                .drop_reason
                .clone()
                .unwrap_or_else(|| "rejected by collector".to_string());
            warn!(
                namespace = %namespace,
                count = applied.dropped.len(),
                reason = %reason,
                "Collector rejected events, dropping"
            );
            self.stats.add_dropped(applied.dropped.len());
            self.sink.record(EmissionEvent::EventsDropped {
                namespace,
                store_ids: applied.dropped.clone(),
                reason: DropReason::Rejected(reason),
            });
        }
    }
}

/// Handle to one namespace's emission loop.
pub struct Emitter {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Emitter {
    /// Creates an emitter. Call [`Emitter::start`] to begin emitting.
    pub fn new(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &EmitterConfig,
        sink: Arc<dyn EmissionSink>,
    ) -> EmitterResult<Self> {
        let target = config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            store,
            dispatcher,
            sink,
            target,
            selector: BatchSelector::from_config(config),
            backoff: config.backoff(),
            oversized_policy: config.oversized_policy,
            tick_interval: config.tick_interval(),
            stats: EmitterStats::default(),
            state: Mutex::new(EmitterState::Idle),
            wake: Notify::new(),
            paused: AtomicBool::new(false),
            online: AtomicBool::new(true),
            queue_empty: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
        });

        Ok(Self {
            shared,
            shutdown_tx,
            task: Mutex::new(None),
        })
    }

    /// Spawns the emission loop on the current tokio runtime.
    ///
    /// The loop advances immediately, so events persisted before startup
    /// are sent first. Calling this twice has no effect.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            warn!(namespace = %self.namespace(), "Emitter already started");
            return;
        }
        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        *task = Some(tokio::spawn(run(shared, shutdown_rx)));
    }

    pub fn namespace(&self) -> &str {
        self.shared.namespace()
    }

    pub fn state(&self) -> EmitterState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Asks the loop to advance now instead of at the next tick.
    ///
    /// Has no effect on a pending backoff delay.
    pub fn flush(&self) {
        self.shared.wake.notify_one();
    }

    /// Called by producers after an enqueue. Wakes the loop only when it
    /// last saw an empty store.
    pub fn notify_enqueued(&self) {
        if self.shared.queue_empty.swap(false, Ordering::SeqCst) {
            self.shared.wake.notify_one();
        }
    }

    /// Suspends dispatching. An in-flight dispatch still completes.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            info!(namespace = %self.namespace(), "Emitter paused");
        }
    }

    /// Resumes dispatching and advances immediately.
    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            info!(namespace = %self.namespace(), "Emitter resumed");
        }
        self.shared.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Reachability signal. Offline emitters hold their events.
    pub fn set_network_available(&self, available: bool) {
        let was = self.shared.online.swap(available, Ordering::SeqCst);
        if was != available {
            info!(namespace = %self.namespace(), available, "Network availability changed");
        }
        if available {
            self.shared.wake.notify_one();
        }
    }

    pub fn is_network_available(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(namespace = %self.namespace(), error = %e, "Emitter task failed");
            }
        }
        let mut state = self.shared.state.lock();
        if *state != EmitterState::Halted {
            *state = EmitterState::Stopped;
        }
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

async fn run(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    info!(namespace = %shared.namespace(), "Emitter started");

    let period = shared.tick_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if stop_requested(&shutdown) {
            break;
        }

        if !shared.can_advance() {
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = shutdown.changed() => {}
            }
            ticker.reset();
            continue;
        }

        match drain(&shared, &shutdown).await {
            Cycle::Idle => {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shared.wake.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
            Cycle::BackOff(delay) => {
                shared.set_state(EmitterState::BackingOff);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
                shared.set_state(EmitterState::Idle);
            }
            Cycle::Halt => {
                shared.set_state(EmitterState::Halted);
                return;
            }
        }
    }

    shared.set_state(EmitterState::Stopped);
    info!(namespace = %shared.namespace(), "Emitter stopped");
}

/// Sends batches until the store is empty, a failure calls for backoff,
/// or the loop is stopped, paused or taken offline.
async fn drain(shared: &Shared, shutdown: &watch::Receiver<bool>) -> Cycle {
    loop {
        if stop_requested(shutdown) || !shared.can_advance() {
            return Cycle::Idle;
        }

        shared.queue_empty.store(true, Ordering::SeqCst);
        let batch = match shared.selector.next_batch(shared.store.as_ref()) {
            Ok(Some(batch)) => {
                shared.queue_empty.store(false, Ordering::SeqCst);
                batch
            }
            Ok(None) => return Cycle::Idle,
            Err(e) if e.is_fatal() => {
                shared.halt(&e);
                return Cycle::Halt;
            }
            Err(e) => {
                shared.queue_empty.store(false, Ordering::SeqCst);
                warn!(namespace = %shared.namespace(), error = %e, "Batch selection failed");
                shared.stats.add_store_failure();
                shared.sink.record(EmissionEvent::StoreReadFailed {
                    namespace: shared.namespace().to_string(),
                    error: e.to_string(),
                });
                return Cycle::BackOff(shared.register_failure());
            }
        };

        if batch.oversized && shared.oversized_policy == OversizedPolicy::Drop {
            let ids = batch.store_ids();
            if let Err(e) = remove_ids(shared.store.as_ref(), &ids) {
                return store_write_failed(shared, e);
            }
            warn!(
                namespace = %shared.namespace(),
                bytes = batch.byte_size(),
                limit = shared.selector.byte_limit(),
                "Dropping oversized event"
            );
            shared.stats.add_dropped(ids.len());
            shared.sink.record(EmissionEvent::EventsDropped {
                namespace: shared.namespace().to_string(),
                store_ids: ids,
                reason: DropReason::Oversized,
            });
            continue;
        }

        shared.set_state(EmitterState::Sending);
        let outcome = shared.dispatcher.send(&batch, &shared.target).await;
        shared.set_state(EmitterState::Idle);
        shared.stats.add_dispatch();
        debug!(
            namespace = %shared.namespace(),
            batch_id = %batch.batch_id,
            events = batch.len(),
            outcome = outcome.kind(),
            "Dispatch finished"
        );

        let applied = match apply_outcome(shared.store.as_ref(), &outcome) {
            Ok(applied) => applied,
            Err(e) => return store_write_failed(shared, e),
        };
        shared.report(&applied);

        if applied.back_off {
            if let DispatchOutcome::RetryableFailure { reason } = &outcome {
                debug!(namespace = %shared.namespace(), reason = %reason, "Retryable dispatch failure");
            }
            return Cycle::BackOff(shared.register_failure());
        }
        shared.reset_failures();
    }
}

fn store_write_failed(shared: &Shared, e: StoreError) -> Cycle {
    if e.is_fatal() {
        shared.halt(&e);
        return Cycle::Halt;
    }
    // Events stay in the store and will be sent again.
    warn!(namespace = %shared.namespace(), error = %e, "Could not remove acknowledged events");
    shared.stats.add_store_failure();
    Cycle::BackOff(shared.register_failure())
}
