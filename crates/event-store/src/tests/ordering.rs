//! Id assignment and FIFO ordering.

use super::{backends, numbered};
use crate::StoreId;

#[test]
fn ids_strictly_increase() {
    for (name, store) in backends() {
        let ids: Vec<StoreId> = (0..20).map(|n| store.enqueue(&numbered(n)).unwrap()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{name}: {:?} !< {:?}", pair[0], pair[1]);
        }
    }
}

#[test]
fn ids_are_not_reused_after_removal() {
    for (name, store) in backends() {
        let first = store.enqueue(&numbered(1)).unwrap();
        let second = store.enqueue(&numbered(2)).unwrap();
        store.remove(second).unwrap();
        store.remove(first).unwrap();

        let third = store.enqueue(&numbered(3)).unwrap();
        assert!(third > second, "{name}: id {third} reused");
    }
}

#[test]
fn ids_are_not_reused_after_remove_all() {
    for (name, store) in backends() {
        let last = store.enqueue(&numbered(1)).unwrap();
        store.remove_all().unwrap();
        assert!(store.enqueue(&numbered(2)).unwrap() > last, "{name}");
    }
}

#[test]
fn concurrent_enqueues_get_unique_ids() {
    use std::collections::HashSet;
    use std::sync::Arc;

    let store: Arc<dyn crate::EventStore> = Arc::new(
        crate::SqliteEventStore::in_memory("test", crate::StoreLimits::unbounded()).unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                (0..50)
                    .map(|n| store.enqueue(&numbered(t * 100 + n)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), 200);
    assert_eq!(store.count().unwrap(), 200);
}

#[test]
fn last_inserted_id_tracks_assignments_not_contents() {
    for (name, store) in backends() {
        assert_eq!(store.last_inserted_id().unwrap(), None, "{name}");

        store.enqueue(&numbered(1)).unwrap();
        let id = store.enqueue(&numbered(2)).unwrap();
        assert_eq!(store.last_inserted_id().unwrap(), Some(id), "{name}");

        store.remove_all().unwrap();
        assert_eq!(store.last_inserted_id().unwrap(), Some(id), "{name}");
    }
}
