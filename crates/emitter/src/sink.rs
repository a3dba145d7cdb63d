//! Observability channel for emission side-effects.
//!
//! Dispatch-cycle errors never reach the producer. The emission loop reports
//! them here, alongside successes, as [`EmissionEvent`]s, and keeps running
//! counters in [`EmitterStats`].

use event_store::StoreId;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Why events left the store without being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The collector permanently rejected them.
    Rejected(String),
    /// A single event larger than the byte limit under the `Drop` policy.
    Oversized,
}

/// A side-effect of the emission loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmissionEvent {
    BatchDelivered {
        namespace: String,
        store_ids: Vec<StoreId>,
    },
    /// Failed in a partial result; kept for retry.
    EventsRetained {
        namespace: String,
        store_ids: Vec<StoreId>,
    },
    EventsDropped {
        namespace: String,
        store_ids: Vec<StoreId>,
        reason: DropReason,
    },
    BackoffScheduled {
        namespace: String,
        consecutive_failures: u32,
        delay: Duration,
    },
    StoreReadFailed {
        namespace: String,
        error: String,
    },
    /// The store is corrupt; this namespace stopped emitting.
    NamespaceHalted {
        namespace: String,
        error: String,
    },
}

/// Receives emission side-effects. Must not block.
pub trait EmissionSink: Send + Sync {
    fn record(&self, event: EmissionEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EmissionSink for NullSink {
    fn record(&self, _event: EmissionEvent) {}
}

/// Keeps every event, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EmissionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EmissionEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Backoff delays scheduled so far, in order.
    pub fn backoff_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                EmissionEvent::BackoffScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Store ids dropped so far, in order.
    pub fn dropped_ids(&self) -> Vec<StoreId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                EmissionEvent::EventsDropped { store_ids, .. } => Some(store_ids.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

impl EmissionSink for RecordingSink {
    fn record(&self, event: EmissionEvent) {
        self.events.lock().push(event);
    }
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EmissionSink for TracingSink {
    fn record(&self, event: EmissionEvent) {
        match event {
            EmissionEvent::BatchDelivered {
                namespace,
                store_ids,
            } => info!(namespace = %namespace, count = store_ids.len(), "Batch delivered"),
            EmissionEvent::EventsRetained {
                namespace,
                store_ids,
            } => warn!(namespace = %namespace, count = store_ids.len(), "Events retained for retry"),
            EmissionEvent::EventsDropped {
                namespace,
                store_ids,
                reason,
            } => warn!(
                namespace = %namespace,
                count = store_ids.len(),
                reason = ?reason,
                "Events dropped"
            ),
            EmissionEvent::BackoffScheduled {
                namespace,
                consecutive_failures,
                delay,
            } => warn!(
                namespace = %namespace,
                consecutive_failures,
                delay_ms = delay.as_millis() as u64,
                "Backing off"
            ),
            EmissionEvent::StoreReadFailed { namespace, error } => {
                warn!(namespace = %namespace, error = %error, "Store read failed")
            }
            EmissionEvent::NamespaceHalted { namespace, error } => {
                error!(namespace = %namespace, error = %error, "Namespace halted")
            }
        }
    }
}

/// Running counters for one emitter.
#[derive(Debug, Default)]
pub struct EmitterStats {
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
    events_retained: AtomicU64,
    dispatches: AtomicU64,
    retries: AtomicU64,
    store_failures: AtomicU64,
}

/// Point-in-time copy of [`EmitterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_sent: u64,
    pub events_dropped: u64,
    pub events_retained: u64,
    pub dispatches: u64,
    pub retries: u64,
    pub store_failures: u64,
}

impl EmitterStats {
    pub(crate) fn add_sent(&self, n: usize) {
        self.events_sent.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dropped(&self, n: usize) {
        self.events_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_retained(&self, n: usize) {
        self.events_retained.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_retained: self.events_retained.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}
