//! # Event Store
//!
//! Durable, crash-safe queue of telemetry payloads that have been tracked but
//! not yet acknowledged by the collector.
//!
//! ## Principles
//!
//! - **The store is the acknowledgement ledger** - an event present in the store
//!   has not been confirmed delivered; an absent event was delivered or never existed
//! - **Ids are the ordering** - store ids are assigned on insert, strictly increase
//!   and are never reused, so id order is FIFO order
//! - **Reads never mutate** - selections are snapshots; only `remove*` mutates
//! - **One file per namespace** - namespaces never share durable state
//!
//! ## Example
//!
//! ```rust
//! use event_store::{EventStore, MemoryEventStore, Payload};
//!
//! let store = MemoryEventStore::new("app");
//! let id = store
//!     .enqueue(&Payload::builder().string("e", "pv").build())
//!     .unwrap();
//!
//! let batch = store.select_by_count(10).unwrap();
//! assert_eq!(batch[0].store_id, id);
//!
//! assert!(store.remove(id).unwrap());
//! assert!(!store.remove(id).unwrap());
//! ```
//!
//! ## Crate Structure
//!
//! - [`payload`] - Immutable ordered event payloads
//! - [`store`] - The [`EventStore`] trait
//! - [`sqlite`] - Production backend
//! - [`memory`] - In-memory backend for tests and ephemeral namespaces
//! - [`catalog`] - Namespace enumeration and the zombie-namespace sweep

pub mod catalog;
mod error;
pub mod memory;
pub mod payload;
pub mod sqlite;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;

pub use catalog::{remove_unsent_except, MemoryCatalog, SqliteCatalog, StoreCatalog, SweepReport};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryEventStore;
pub use payload::{Payload, PayloadBuilder, PayloadValue};
pub use sqlite::SqliteEventStore;
pub use store::{EventStore, StoreLimits};
pub use types::{EmitterEvent, StoreId, StoredEvent};
