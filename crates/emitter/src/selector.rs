//! Batch selection.

use crate::config::EmitterConfig;
use event_store::{EmitterEvent, EventStore, StoreId, StoreResult};
use uuid::Uuid;

/// One dispatch unit: the oldest events of a namespace.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: Uuid,
    /// Ascending by store id.
    pub events: Vec<EmitterEvent>,
    /// A single event larger than the byte limit.
    pub oversized: bool,
}

impl Batch {
    pub fn new(events: Vec<EmitterEvent>, oversized: bool) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            events,
            oversized,
        }
    }

    pub fn store_ids(&self) -> Vec<StoreId> {
        self.events.iter().map(|e| e.store_id).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn byte_size(&self) -> u64 {
        self.events.iter().map(|e| e.byte_size).sum()
    }
}

/// Picks the next batch from a store under count and byte limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSelector {
    max_events: usize,
    byte_limit: u64,
}

impl BatchSelector {
    pub fn new(max_events: usize, byte_limit: u64) -> Self {
        Self {
            max_events: max_events.max(1),
            byte_limit,
        }
    }

    pub fn from_config(config: &EmitterConfig) -> Self {
        Self::new(config.max_events_per_batch(), config.byte_limit())
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    pub fn byte_limit(&self) -> u64 {
        self.byte_limit
    }

    /// The longest FIFO prefix satisfying both limits, or `None` when the
    /// store is empty.
    ///
    /// An event that alone exceeds the byte limit is returned by itself and
    /// flagged `oversized`.
    pub fn next_batch(&self, store: &dyn EventStore) -> StoreResult<Option<Batch>> {
        let mut by_count = store.select_by_count(self.max_events)?;
        if by_count.is_empty() {
            return Ok(None);
        }
        let by_size = store.select_by_size(self.byte_limit)?;

        // Both are prefixes of the same queue; keep the common part.
        let common = by_count
            .iter()
            .zip(&by_size)
            .take_while(|(a, b)| a.store_id == b.store_id)
            .count();
        if common == 0 {
            return Ok(None);
        }
        by_count.truncate(common);

        let oversized = by_count.len() == 1 && by_count[0].byte_size > self.byte_limit;
        Ok(Some(Batch::new(by_count, oversized)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{MemoryEventStore, Payload};

    fn sized(bytes: usize) -> Payload {
        // {"d":"..."} carries 8 bytes of framing.
        Payload::builder()
            .string("d", "x".repeat(bytes - 8))
            .build()
    }

    #[test]
    fn test_count_limit_binds() {
        let store = MemoryEventStore::new("ns");
        for _ in 0..5 {
            store.enqueue(&sized(100)).unwrap();
        }
        let batch = BatchSelector::new(3, 40_000)
            .next_batch(&store)
            .unwrap()
            .unwrap();
        assert_eq!(batch.store_ids(), vec![StoreId(1), StoreId(2), StoreId(3)]);
        assert!(!batch.oversized);
    }

    #[test]
    fn test_size_limit_binds() {
        let store = MemoryEventStore::new("ns");
        store.enqueue(&sized(900)).unwrap();
        store.enqueue(&sized(900)).unwrap();
        let batch = BatchSelector::new(10, 1000)
            .next_batch(&store)
            .unwrap()
            .unwrap();
        assert_eq!(batch.store_ids(), vec![StoreId(1)]);
        assert_eq!(batch.byte_size(), 900);
        assert!(!batch.oversized);
    }

    #[test]
    fn test_oversized_head_is_flagged() {
        let store = MemoryEventStore::new("ns");
        store.enqueue(&sized(5000)).unwrap();
        store.enqueue(&sized(10)).unwrap();
        let batch = BatchSelector::new(10, 1000)
            .next_batch(&store)
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(batch.oversized);
    }

    #[test]
    fn test_empty_store_yields_no_batch() {
        let store = MemoryEventStore::new("ns");
        assert!(BatchSelector::new(10, 1000)
            .next_batch(&store)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_read_failure_propagates() {
        let store = MemoryEventStore::new("ns");
        store.enqueue(&sized(10)).unwrap();
        store.set_fail_reads(true);
        assert!(BatchSelector::new(10, 1000).next_batch(&store).is_err());
    }
}
