//! # Emitter
//!
//! Drains namespaced [`event_store::EventStore`]s to a remote collector.
//!
//! ## Overview
//!
//! Each namespace runs one emission loop as a background tokio task:
//!
//! ```text
//! ┌──────────┐  enqueue  ┌─────────────┐  next batch  ┌──────────────┐  send  ┌────────────┐
//! │ Producer │──────────▶│ Event Store │─────────────▶│   Emitter    │───────▶│ Dispatcher │──▶ Collector
//! └──────────┘           └──────▲──────┘              │ (controller) │◀───────└────────────┘
//!                               │  remove delivered   └──────┬───────┘ outcome
//!                               └────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Store is the ledger**: events leave the store only when the collector
//!   accepted them or permanently rejected them.
//! - **Single flight**: at most one batch per namespace is in flight.
//! - **FIFO**: batches are always the oldest unacknowledged events.
//! - **Backoff**: retryable failures back off exponentially with jitter,
//!   capped, retried without limit.
//! - **Never fatal to the host**: network and storage failures are absorbed
//!   and reported through an [`EmissionSink`]; only store corruption halts
//!   the affected namespace.
//!
//! ## Example
//!
//! ```ignore
//! use emitter::{EmitterConfig, HttpDispatcher, TrackerRegistry};
//! use event_store::{Payload, SqliteCatalog, StoreLimits};
//!
//! let config = EmitterConfig::new("https://collector.example.com/events");
//! let dispatcher = Arc::new(HttpDispatcher::from_config(&config)?);
//! let catalog = Arc::new(SqliteCatalog::new(data_dir, StoreLimits::unbounded()));
//!
//! let registry = TrackerRegistry::new(catalog, dispatcher);
//! let tracker = registry.create("app", &config)?;
//! tracker.track(&Payload::builder().string("e", "pv").build())?;
//! ```

mod backoff;
mod config;
mod controller;
mod dispatcher;
mod error;
mod http;
mod selector;
mod sink;
mod tracker;

#[cfg(test)]
mod tests;

pub use backoff::Backoff;
pub use config::{BackoffConfig, BufferOption, EmitterConfig, HttpMethod, OversizedPolicy};
pub use controller::{apply_outcome, AppliedOutcome, Emitter, EmitterState};
pub use dispatcher::{CollectorTarget, DispatchOutcome, Dispatcher, StatusPolicy};
pub use error::{EmitterError, EmitterResult};
pub use http::HttpDispatcher;
pub use selector::{Batch, BatchSelector};
pub use sink::{
    DropReason, EmissionEvent, EmissionSink, EmitterStats, NullSink, RecordingSink, StatsSnapshot,
    TracingSink,
};
pub use tracker::{Tracker, TrackerRegistry};
