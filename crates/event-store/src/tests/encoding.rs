//! Payloads the store refuses to persist.

use super::{backends, numbered};
use crate::{Payload, StoreError, StoreId};

#[test]
fn non_finite_float_is_refused_before_writing() {
    for (name, store) in backends() {
        let bad = Payload::builder()
            .string("e", "se")
            .float("v", f64::NAN)
            .build();

        let err = store.enqueue(&bad).unwrap_err();
        assert!(matches!(err, StoreError::Write(_)), "{name}: {err:?}");
        assert!(!err.is_fatal(), "{name}");
        assert_eq!(store.count().unwrap(), 0, "{name}");
        assert_eq!(store.last_inserted_id().unwrap(), None, "{name}");
    }
}

#[test]
fn refused_payload_does_not_block_later_events() {
    for (name, store) in backends() {
        let nested_infinity = Payload::builder()
            .nested("cx", Payload::builder().float("r", f64::INFINITY).build())
            .build();
        store.enqueue(&nested_infinity).unwrap_err();

        let id = store.enqueue(&numbered(1)).unwrap();
        assert_eq!(id, StoreId(1), "{name}");

        let selected = store.select_by_count(10).unwrap();
        assert_eq!(selected.len(), 1, "{name}");
        assert_eq!(selected[0].payload, numbered(1), "{name}");
    }
}
