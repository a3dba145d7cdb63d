//! Producer-facing trackers and the namespace registry.

use crate::config::EmitterConfig;
use crate::controller::{Emitter, EmitterState};
use crate::dispatcher::Dispatcher;
use crate::error::{EmitterError, EmitterResult};
use crate::sink::{EmissionSink, NullSink, StatsSnapshot};
use event_store::{
    remove_unsent_except, EventStore, Payload, StoreCatalog, StoreId, StoreResult, SweepReport,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A namespace's store plus its running emitter.
pub struct Tracker {
    store: Arc<dyn EventStore>,
    emitter: Emitter,
}

impl Tracker {
    /// Builds a tracker and starts its emitter on the current runtime.
    pub fn new(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &EmitterConfig,
        sink: Arc<dyn EmissionSink>,
    ) -> EmitterResult<Self> {
        let emitter = Emitter::new(store.clone(), dispatcher, config, sink)?;
        emitter.start();
        Ok(Self { store, emitter })
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Persists an event for delivery.
    ///
    /// Returns once the event is durable. Fails with `Write` or `Overflow`,
    /// in which case the event is not kept.
    pub fn track(&self, payload: &Payload) -> StoreResult<StoreId> {
        let id = self.store.enqueue(payload)?;
        debug!(namespace = %self.namespace(), store_id = %id, "Event tracked");
        self.emitter.notify_enqueued();
        Ok(id)
    }

    pub fn flush(&self) {
        self.emitter.flush();
    }

    pub fn pause(&self) {
        self.emitter.pause();
    }

    pub fn resume(&self) {
        self.emitter.resume();
    }

    pub fn set_network_available(&self, available: bool) {
        self.emitter.set_network_available(available);
    }

    pub fn state(&self) -> EmitterState {
        self.emitter.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.emitter.stats()
    }

    /// Events still waiting for delivery.
    pub fn pending(&self) -> StoreResult<usize> {
        self.store.count()
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    pub async fn shutdown(&self) {
        self.emitter.shutdown().await;
    }
}

/// Owns every tracker of a process, keyed by namespace.
///
/// The first tracker created becomes the default until another is chosen.
pub struct TrackerRegistry {
    catalog: Arc<dyn StoreCatalog>,
    dispatcher: Arc<dyn Dispatcher>,
    sink: Arc<dyn EmissionSink>,
    trackers: RwLock<HashMap<String, Arc<Tracker>>>,
    default_namespace: RwLock<Option<String>>,
}

impl TrackerRegistry {
    pub fn new(catalog: Arc<dyn StoreCatalog>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::with_sink(catalog, dispatcher, Arc::new(NullSink))
    }

    pub fn with_sink(
        catalog: Arc<dyn StoreCatalog>,
        dispatcher: Arc<dyn Dispatcher>,
        sink: Arc<dyn EmissionSink>,
    ) -> Self {
        Self {
            catalog,
            dispatcher,
            sink,
            trackers: RwLock::new(HashMap::new()),
            default_namespace: RwLock::new(None),
        }
    }

    /// Opens the namespace's store and starts a tracker for it.
    pub fn create(&self, namespace: &str, config: &EmitterConfig) -> EmitterResult<Arc<Tracker>> {
        let mut trackers = self.trackers.write();
        if trackers.contains_key(namespace) {
            return Err(EmitterError::NamespaceExists(namespace.to_string()));
        }

        let store = self.catalog.open(namespace)?;
        let tracker = Arc::new(Tracker::new(
            store,
            self.dispatcher.clone(),
            config,
            self.sink.clone(),
        )?);
        trackers.insert(namespace.to_string(), tracker.clone());

        let mut default = self.default_namespace.write();
        if default.is_none() {
            *default = Some(namespace.to_string());
        }

        info!(namespace = %namespace, endpoint = %config.endpoint, "Tracker created");
        Ok(tracker)
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<Tracker>> {
        self.trackers.read().get(namespace).cloned()
    }

    pub fn default_tracker(&self) -> Option<Arc<Tracker>> {
        let default = self.default_namespace.read().clone()?;
        self.get(&default)
    }

    pub fn set_default(&self, namespace: &str) -> EmitterResult<()> {
        if !self.trackers.read().contains_key(namespace) {
            return Err(EmitterError::NamespaceNotFound(namespace.to_string()));
        }
        *self.default_namespace.write() = Some(namespace.to_string());
        Ok(())
    }

    /// Registered namespaces, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self.trackers.read().keys().cloned().collect();
        namespaces.sort();
        namespaces
    }

    /// Shuts a tracker down and unregisters it. Its events stay persisted.
    ///
    /// Returns false if the namespace was not registered.
    pub async fn remove(&self, namespace: &str) -> bool {
        let removed = self.trackers.write().remove(namespace);
        let Some(tracker) = removed else {
            return false;
        };

        {
            let mut default = self.default_namespace.write();
            if default.as_deref() == Some(namespace) {
                *default = None;
            }
        }

        tracker.shutdown().await;
        info!(namespace = %namespace, "Tracker removed");
        true
    }

    /// Removes the tracker and deletes every event it had not sent.
    pub async fn remove_and_purge(&self, namespace: &str) -> EmitterResult<bool> {
        let removed = self.remove(namespace).await;
        let purged = self.catalog.purge(namespace)?;
        Ok(removed || purged)
    }

    /// Purges stores of every namespace that has no tracker here.
    pub fn sweep_unregistered(&self) -> EmitterResult<SweepReport> {
        let keep = self.namespaces();
        let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
        Ok(remove_unsent_except(self.catalog.as_ref(), &keep)?)
    }

    /// Shuts down every tracker.
    pub async fn shutdown_all(&self) {
        let trackers: Vec<Arc<Tracker>> = self.trackers.read().values().cloned().collect();
        for tracker in trackers {
            tracker.shutdown().await;
        }
    }
}
