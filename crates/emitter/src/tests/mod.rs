//! Integration tests for the emitter.
//!
//! - `harness.rs`  - mock dispatcher, mock collector, corrupt store, harness
//! - `delivery.rs` - draining, FIFO batches, wake on enqueue
//! - `partial.rs`  - per-event results and retry of failed events
//! - `backoff.rs`  - retry delays and store stability under failure
//! - `control.rs`  - pause, resume, reachability, shutdown
//! - `failures.rs` - terminal drops, oversized events, store failures
//! - `http.rs`     - HTTP dispatcher against a live socket
//! - `registry.rs` - trackers and the namespace registry

mod delivery;
