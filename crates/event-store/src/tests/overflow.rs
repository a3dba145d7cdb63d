//! Size ceiling backpressure.

use super::{backends_with, payload_of_size};
use crate::{StoreError, StoreLimits};

#[test]
fn enqueue_beyond_ceiling_is_rejected() {
    for (name, store) in backends_with(StoreLimits::with_max_total_bytes(1000)) {
        store.enqueue(&payload_of_size(600)).unwrap();

        let err = store.enqueue(&payload_of_size(500)).unwrap_err();
        assert!(
            matches!(
                err,
                StoreError::Overflow {
                    current: 600,
                    incoming: 500,
                    limit: 1000
                }
            ),
            "{name}: {err:?}"
        );
        assert_eq!(store.count().unwrap(), 1, "{name}");
    }
}

#[test]
fn ceiling_is_inclusive() {
    for (name, store) in backends_with(StoreLimits::with_max_total_bytes(1000)) {
        store.enqueue(&payload_of_size(600)).unwrap();
        store.enqueue(&payload_of_size(400)).unwrap();
        assert_eq!(store.total_size().unwrap(), 1000, "{name}");
    }
}

#[test]
fn space_freed_by_removal_accepts_new_events() {
    for (name, store) in backends_with(StoreLimits::with_max_total_bytes(1000)) {
        let id = store.enqueue(&payload_of_size(900)).unwrap();
        assert!(store.enqueue(&payload_of_size(200)).is_err(), "{name}");

        store.remove(id).unwrap();
        store.enqueue(&payload_of_size(200)).unwrap();
        assert_eq!(store.count().unwrap(), 1, "{name}");
    }
}

#[test]
fn rejected_enqueue_does_not_consume_an_id() {
    for (name, store) in backends_with(StoreLimits::with_max_total_bytes(100)) {
        let first = store.enqueue(&payload_of_size(60)).unwrap();
        store.enqueue(&payload_of_size(60)).unwrap_err();
        assert_eq!(store.last_inserted_id().unwrap(), Some(first), "{name}");
    }
}
