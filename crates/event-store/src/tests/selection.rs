//! Count and size bounded selection.

use super::{backends, numbered, payload_of_size};
use crate::StoreId;

fn ids(events: &[crate::EmitterEvent]) -> Vec<i64> {
    events.iter().map(|e| e.store_id.0).collect()
}

/// Enqueue P1, P2, P3 and select two by count.
#[test]
fn select_by_count_returns_oldest_first() {
    for (name, store) in backends() {
        let p: Vec<_> = (1..=3).map(numbered).collect();
        for payload in &p {
            store.enqueue(payload).unwrap();
        }

        let batch = store.select_by_count(2).unwrap();
        assert_eq!(ids(&batch), vec![1, 2], "{name}");
        assert_eq!(batch[0].payload, p[0], "{name}");
        assert_eq!(batch[1].payload, p[1], "{name}");
    }
}

#[test]
fn select_by_count_returns_fewer_when_fewer_exist() {
    for (name, store) in backends() {
        store.enqueue(&numbered(1)).unwrap();
        assert_eq!(store.select_by_count(10).unwrap().len(), 1, "{name}");
        assert!(store.select_by_count(0).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn select_by_count_skips_removed_events() {
    for (name, store) in backends() {
        for n in 1..=5 {
            store.enqueue(&numbered(n)).unwrap();
        }
        store.remove(StoreId(1)).unwrap();
        store.remove(StoreId(3)).unwrap();

        assert_eq!(ids(&store.select_by_count(3).unwrap()), vec![2, 4, 5], "{name}");
    }
}

/// Two 900 byte events with a 1000 byte limit: only the first fits.
#[test]
fn select_by_size_stops_before_limit() {
    for (name, store) in backends() {
        store.enqueue(&payload_of_size(900)).unwrap();
        store.enqueue(&payload_of_size(900)).unwrap();

        let batch = store.select_by_size(1000).unwrap();
        assert_eq!(ids(&batch), vec![1], "{name}");
    }
}

#[test]
fn select_by_size_fills_up_to_limit_exactly() {
    for (name, store) in backends() {
        for _ in 0..4 {
            store.enqueue(&payload_of_size(250)).unwrap();
        }
        store.enqueue(&payload_of_size(10)).unwrap();

        let batch = store.select_by_size(1000).unwrap();
        assert_eq!(ids(&batch), vec![1, 2, 3, 4], "{name}");
        let total: u64 = batch.iter().map(|e| e.byte_size).sum();
        assert_eq!(total, 1000, "{name}");
    }
}

#[test]
fn select_by_size_emits_oversized_head_alone() {
    for (name, store) in backends() {
        store.enqueue(&payload_of_size(5000)).unwrap();
        store.enqueue(&payload_of_size(100)).unwrap();

        let batch = store.select_by_size(1000).unwrap();
        assert_eq!(ids(&batch), vec![1], "{name}");
        assert_eq!(batch[0].byte_size, 5000, "{name}");
    }
}

#[test]
fn selections_do_not_mutate() {
    for (name, store) in backends() {
        for n in 1..=3 {
            store.enqueue(&numbered(n)).unwrap();
        }
        let before = store.select_by_count(usize::MAX).unwrap();
        store.select_by_count(2).unwrap();
        store.select_by_size(10).unwrap();
        store.total_size().unwrap();

        assert_eq!(store.select_by_count(usize::MAX).unwrap(), before, "{name}");
        assert_eq!(store.count().unwrap(), 3, "{name}");
    }
}

#[test]
fn empty_store_selects_nothing() {
    for (name, store) in backends() {
        assert!(store.select_by_count(5).unwrap().is_empty(), "{name}");
        assert!(store.select_by_size(5).unwrap().is_empty(), "{name}");
        assert_eq!(store.total_size().unwrap(), 0, "{name}");
    }
}

#[test]
fn total_size_sums_serialized_sizes() {
    for (name, store) in backends() {
        store.enqueue(&payload_of_size(100)).unwrap();
        let id = store.enqueue(&payload_of_size(250)).unwrap();
        assert_eq!(store.total_size().unwrap(), 350, "{name}");

        store.remove(id).unwrap();
        assert_eq!(store.total_size().unwrap(), 100, "{name}");
    }
}
