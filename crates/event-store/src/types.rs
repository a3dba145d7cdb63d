//! Core types for the event store.

use crate::payload::Payload;
use chrono::{DateTime, Utc};
use std::fmt;

/// Identifier assigned to an event by its store.
///
/// Strictly increasing within a namespace and never reused, so ordering by
/// `StoreId` is FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub i64);

impl StoreId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for StoreId {
    fn from(value: i64) -> Self {
        StoreId(value)
    }
}

/// A persisted event as the store holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub store_id: StoreId,
    pub payload: Payload,
    pub inserted_at: DateTime<Utc>,
}

/// Read-only projection handed to the emitter by selection queries.
///
/// Only the store constructs these. `byte_size` is the serialized size
/// recorded at enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterEvent {
    pub store_id: StoreId,
    pub payload: Payload,
    pub byte_size: u64,
}

impl From<&StoredEvent> for EmitterEvent {
    fn from(event: &StoredEvent) -> Self {
        Self {
            store_id: event.store_id,
            byte_size: event.payload.byte_size().unwrap_or(0),
            payload: event.payload.clone(),
        }
    }
}
