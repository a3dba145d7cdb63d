//! Namespace catalogs and the zombie-namespace sweep.
//!
//! Every namespace owns its own store. When an application stops using a
//! namespace, the events persisted under it can never be sent: nothing will
//! ever open that store again. [`remove_unsent_except`] is the maintenance
//! entry point that purges such stores, given the namespaces still in use.
//! It is invoked by operators or the host application, never by the emitter.

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryEventStore;
use crate::sqlite::SqliteEventStore;
use crate::store::{EventStore, StoreLimits};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const FILE_PREFIX: &str = "events-";
const FILE_SUFFIX: &str = ".sqlite";

/// A set of namespaced stores.
pub trait StoreCatalog: Send + Sync {
    /// Opens the store for `namespace`, creating it if needed.
    ///
    /// Opening the same namespace twice returns the same store instance.
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn EventStore>>;

    /// Every namespace with a store in this catalog, sorted.
    fn namespaces(&self) -> StoreResult<Vec<String>>;

    /// Deletes the namespace's store and all its events.
    /// Returns false if the namespace had no store.
    fn purge(&self, namespace: &str) -> StoreResult<bool>;
}

/// Outcome of a [`remove_unsent_except`] sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: Vec<String>,
    pub purged: Vec<String>,
}

/// Purges every store whose namespace is not in `keep`.
pub fn remove_unsent_except(
    catalog: &dyn StoreCatalog,
    keep: &[&str],
) -> StoreResult<SweepReport> {
    let mut report = SweepReport::default();

    for namespace in catalog.namespaces()? {
        if keep.contains(&namespace.as_str()) {
            report.kept.push(namespace);
            continue;
        }
        if catalog.purge(&namespace)? {
            report.purged.push(namespace);
        }
    }

    info!(
        kept = report.kept.len(),
        purged = report.purged.len(),
        "Namespace sweep complete"
    );
    Ok(report)
}

/// Catalog of SQLite stores, one file per namespace in a directory.
pub struct SqliteCatalog {
    dir: PathBuf,
    limits: StoreLimits,
    open: Mutex<HashMap<String, Arc<SqliteEventStore>>>,
}

impl SqliteCatalog {
    pub fn new(dir: impl Into<PathBuf>, limits: StoreLimits) -> Self {
        Self {
            dir: dir.into(),
            limits,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that holds the namespace's events.
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced with `-`. Two
    /// namespaces that sanitize to the same name are told apart by the
    /// namespace recorded inside the file; opening the second one fails.
    pub fn store_path(&self, namespace: &str) -> StoreResult<PathBuf> {
        if namespace.trim().is_empty() {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }
        let sanitized: String = namespace
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Ok(self.dir.join(format!("{FILE_PREFIX}{sanitized}{FILE_SUFFIX}")))
    }

    fn store_files(&self) -> StoreResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_store = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false);
            if is_store {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl StoreCatalog for SqliteCatalog {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn EventStore>> {
        let mut open = self.open.lock();
        if let Some(store) = open.get(namespace) {
            return Ok(store.clone());
        }

        let path = self.store_path(namespace)?;
        let store = Arc::new(SqliteEventStore::open(&path, namespace, self.limits)?);
        open.insert(namespace.to_string(), store.clone());
        Ok(store)
    }

    fn namespaces(&self) -> StoreResult<Vec<String>> {
        let mut namespaces = Vec::new();
        for path in self.store_files()? {
            match SqliteEventStore::read_namespace(&path) {
                Ok(Some(ns)) => namespaces.push(ns),
                Ok(None) => {
                    warn!(path = %path.display(), "Store file has no namespace record, skipping")
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable store file, skipping")
                }
            }
        }
        namespaces.sort();
        namespaces.dedup();
        Ok(namespaces)
    }

    fn purge(&self, namespace: &str) -> StoreResult<bool> {
        let path = self.store_path(namespace)?;

        if let Some(store) = self.open.lock().remove(namespace) {
            // Live handles must observe an empty store, not an unlinked file.
            store.remove_all()?;
        }

        if !path.exists() {
            return Ok(false);
        }
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let file = PathBuf::from(file);
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }

        info!(namespace = %namespace, path = %path.display(), "Purged namespace store");
        Ok(true)
    }
}

/// Catalog of in-memory stores.
#[derive(Default)]
pub struct MemoryCatalog {
    stores: Mutex<BTreeMap<String, Arc<MemoryEventStore>>>,
    limits: StoreLimits,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            stores: Mutex::new(BTreeMap::new()),
            limits,
        }
    }

    /// The concrete store for a namespace, if it has been opened.
    pub fn store(&self, namespace: &str) -> Option<Arc<MemoryEventStore>> {
        self.stores.lock().get(namespace).cloned()
    }
}

impl StoreCatalog for MemoryCatalog {
    fn open(&self, namespace: &str) -> StoreResult<Arc<dyn EventStore>> {
        if namespace.trim().is_empty() {
            return Err(StoreError::InvalidNamespace(namespace.to_string()));
        }
        let store = self
            .stores
            .lock()
            .entry(namespace.to_string())
            .or_insert_with(|| Arc::new(MemoryEventStore::with_limits(namespace, self.limits)))
            .clone();
        Ok(store)
    }

    fn namespaces(&self) -> StoreResult<Vec<String>> {
        Ok(self.stores.lock().keys().cloned().collect())
    }

    fn purge(&self, namespace: &str) -> StoreResult<bool> {
        match self.stores.lock().remove(namespace) {
            Some(store) => {
                store.remove_all()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
