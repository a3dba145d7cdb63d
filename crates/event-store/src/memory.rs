//! In-memory event store.
//!
//! Same contract as the SQLite backend, nothing is durable. Used as the test
//! fake and for namespaces that opt out of persistence. Supports injected
//! read/write failures so emitter failure paths can be exercised.

use crate::error::{StoreError, StoreResult};
use crate::payload::Payload;
use crate::store::{encode_payload, take_within_size, EventStore, StoreLimits};
use crate::types::{EmitterEvent, StoreId, StoredEvent};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Inner {
    events: BTreeMap<StoreId, (StoredEvent, u64)>,
    last_id: i64,
}

/// Non-durable [`EventStore`].
pub struct MemoryEventStore {
    namespace: String,
    limits: StoreLimits,
    inner: Mutex<Inner>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryEventStore {
    pub fn new(namespace: &str) -> Self {
        Self::with_limits(namespace, StoreLimits::unbounded())
    }

    pub fn with_limits(namespace: &str, limits: StoreLimits) -> Self {
        Self {
            namespace: namespace.to_string(),
            limits,
            inner: Mutex::new(Inner::default()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every read fail with `StoreError::Read` until cleared.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes every write fail with `StoreError::Write` until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored events, oldest first.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.inner
            .lock()
            .events
            .values()
            .map(|(event, _)| event.clone())
            .collect()
    }

    fn check_read(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Read("injected read failure".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write("injected write failure".to_string()));
        }
        Ok(())
    }
}

impl EventStore for MemoryEventStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn enqueue(&self, payload: &Payload) -> StoreResult<StoreId> {
        self.check_write()?;
        let size = encode_payload(payload)?.len() as u64;

        let mut inner = self.inner.lock();
        if let Some(limit) = self.limits.max_total_bytes {
            let current: u64 = inner.events.values().map(|(_, s)| s).sum();
            if current + size > limit {
                return Err(StoreError::Overflow {
                    current,
                    incoming: size,
                    limit,
                });
            }
        }

        inner.last_id += 1;
        let store_id = StoreId(inner.last_id);
        let event = StoredEvent {
            store_id,
            payload: payload.clone(),
            inserted_at: Utc::now(),
        };
        inner.events.insert(store_id, (event, size));
        Ok(store_id)
    }

    fn remove(&self, id: StoreId) -> StoreResult<bool> {
        self.check_write()?;
        Ok(self.inner.lock().events.remove(&id).is_some())
    }

    fn remove_many(&self, ids: &[StoreId]) -> StoreResult<bool> {
        self.check_write()?;
        let unique: BTreeSet<StoreId> = ids.iter().copied().collect();
        let mut inner = self.inner.lock();
        let mut all_present = true;
        for id in &unique {
            if inner.events.remove(id).is_none() {
                all_present = false;
            }
        }
        Ok(all_present)
    }

    fn remove_all(&self) -> StoreResult<bool> {
        self.check_write()?;
        let mut inner = self.inner.lock();
        let had_events = !inner.events.is_empty();
        inner.events.clear();
        Ok(had_events)
    }

    fn count(&self) -> StoreResult<usize> {
        self.check_read()?;
        Ok(self.inner.lock().events.len())
    }

    fn select_by_count(&self, limit: usize) -> StoreResult<Vec<EmitterEvent>> {
        self.check_read()?;
        Ok(self
            .inner
            .lock()
            .events
            .values()
            .take(limit)
            .map(|(event, size)| EmitterEvent {
                store_id: event.store_id,
                payload: event.payload.clone(),
                byte_size: *size,
            })
            .collect())
    }

    fn select_by_size(&self, byte_limit: u64) -> StoreResult<Vec<EmitterEvent>> {
        self.check_read()?;
        let inner = self.inner.lock();
        let events = inner.events.values().map(|(event, size)| EmitterEvent {
            store_id: event.store_id,
            payload: event.payload.clone(),
            byte_size: *size,
        });
        Ok(take_within_size(events, byte_limit))
    }

    fn total_size(&self) -> StoreResult<u64> {
        self.check_read()?;
        Ok(self.inner.lock().events.values().map(|(_, s)| s).sum())
    }

    fn last_inserted_id(&self) -> StoreResult<Option<StoreId>> {
        self.check_read()?;
        let last = self.inner.lock().last_id;
        Ok((last > 0).then_some(StoreId(last)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_failures_surface_as_read_and_write_errors() {
        let store = MemoryEventStore::new("ns");
        store.set_fail_writes(true);
        assert!(matches!(
            store.enqueue(&Payload::default()),
            Err(StoreError::Write(_))
        ));

        store.set_fail_writes(false);
        store.enqueue(&Payload::default()).unwrap();

        store.set_fail_reads(true);
        assert!(matches!(store.select_by_count(1), Err(StoreError::Read(_))));
        store.set_fail_reads(false);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn events_lists_oldest_first() {
        let store = MemoryEventStore::new("ns");
        for n in 0..3 {
            store
                .enqueue(&Payload::builder().integer("n", n).build())
                .unwrap();
        }
        let ids: Vec<i64> = store.events().iter().map(|e| e.store_id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
