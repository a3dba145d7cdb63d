//! Contract tests for the event store.
//!
//! Every behavioral test runs against both backends, so the in-memory fake
//! cannot drift from the SQLite store.
//!
//! - `ordering.rs`   - id assignment and FIFO order
//! - `selection.rs`  - count and size bounded selection
//! - `removal.rs`    - idempotent and bulk removal
//! - `durability.rs` - restart survival of the SQLite store
//! - `overflow.rs`   - size ceiling backpressure
//! - `sweep.rs`      - zombie namespace sweep over catalogs
//! - `encoding.rs`   - payloads refused at enqueue

mod encoding;
mod ordering;
mod overflow;
mod selection;

use crate::{EventStore, MemoryEventStore, Payload, SqliteEventStore, StoreLimits};

/// One instance of every backend, labelled for assertion messages.
pub(crate) fn backends() -> Vec<(&'static str, Box<dyn EventStore>)> {
    backends_with(StoreLimits::unbounded())
}

pub(crate) fn backends_with(limits: StoreLimits) -> Vec<(&'static str, Box<dyn EventStore>)> {
    vec![
        (
            "memory",
            Box::new(MemoryEventStore::with_limits("test", limits)),
        ),
        (
            "sqlite",
            Box::new(SqliteEventStore::in_memory("test", limits).unwrap()),
        ),
    ]
}

/// A payload that serializes to exactly `bytes` bytes (`{"d":"..."}`).
pub(crate) fn payload_of_size(bytes: usize) -> Payload {
    assert!(bytes >= 8, "smallest sized payload is 8 bytes");
    let payload = Payload::builder().string("d", "x".repeat(bytes - 8)).build();
    assert_eq!(payload.byte_size().unwrap(), bytes as u64);
    payload
}

pub(crate) fn numbered(n: i64) -> Payload {
    Payload::builder().string("e", "pv").integer("n", n).build()
}
