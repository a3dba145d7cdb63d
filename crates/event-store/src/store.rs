//! The event store contract.

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;
use crate::types::{EmitterEvent, StoreId};

/// Resource limits applied to a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreLimits {
    /// Ceiling on [`EventStore::total_size`]. An enqueue that would exceed it
    /// fails with [`StoreError::Overflow`](crate::StoreError::Overflow).
    pub max_total_bytes: Option<u64>,
}

impl StoreLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_total_bytes(max_total_bytes: u64) -> Self {
        Self {
            max_total_bytes: Some(max_total_bytes),
        }
    }
}

/// Durable queue of unacknowledged events for one namespace.
///
/// All operations on a single store are linearizable with respect to each
/// other. Selection operations return finite snapshots and never mutate;
/// only `remove`, `remove_many` and `remove_all` delete events.
pub trait EventStore: Send + Sync {
    /// Namespace this store belongs to.
    fn namespace(&self) -> &str;

    /// Persists a payload and returns its newly assigned id.
    ///
    /// Fails with `Write` when the medium rejects the write and `Overflow`
    /// when the size ceiling is reached. Either way the event is dropped.
    fn enqueue(&self, payload: &Payload) -> StoreResult<StoreId>;

    /// Removes one event. Returns false if it was not present.
    fn remove(&self, id: StoreId) -> StoreResult<bool>;

    /// Removes a set of events. Returns true only if every id was present.
    ///
    /// Not atomic from the caller's point of view: a false result may still
    /// have removed some of the ids.
    fn remove_many(&self, ids: &[StoreId]) -> StoreResult<bool>;

    /// Removes every event in the namespace. Returns true if anything was removed.
    fn remove_all(&self) -> StoreResult<bool>;

    /// Number of unacknowledged events.
    fn count(&self) -> StoreResult<usize>;

    /// Up to `limit` oldest events, ascending by id.
    fn select_by_count(&self, limit: usize) -> StoreResult<Vec<EmitterEvent>>;

    /// Oldest events whose cumulative byte size fits in `byte_limit`.
    ///
    /// When the oldest event alone exceeds the limit it is returned by itself,
    /// so an oversized event can never starve the queue.
    fn select_by_size(&self, byte_limit: u64) -> StoreResult<Vec<EmitterEvent>>;

    /// Sum of the serialized sizes of all unacknowledged events.
    fn total_size(&self) -> StoreResult<u64>;

    /// Most recently assigned id, or `None` if the store never assigned one.
    fn last_inserted_id(&self) -> StoreResult<Option<StoreId>>;
}

/// Serializes a payload for storage.
///
/// A payload that cannot be written as JSON is refused as a write failure,
/// before anything reaches the medium.
pub(crate) fn encode_payload(payload: &Payload) -> StoreResult<String> {
    payload
        .to_json()
        .map_err(|e| StoreError::Write(format!("payload cannot be encoded: {e}")))
}

/// Takes the FIFO prefix of `events` that fits in `byte_limit`.
///
/// Shared by the backends so the oversized-head rule is applied identically.
pub(crate) fn take_within_size<I>(events: I, byte_limit: u64) -> Vec<EmitterEvent>
where
    I: IntoIterator<Item = EmitterEvent>,
{
    let mut selected = Vec::new();
    let mut total: u64 = 0;

    for event in events {
        if selected.is_empty() && event.byte_size > byte_limit {
            selected.push(event);
            break;
        }
        if total + event.byte_size > byte_limit {
            break;
        }
        total += event.byte_size;
        selected.push(event);
    }

    selected
}
