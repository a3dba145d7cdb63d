//! The dispatch seam between the emission loop and the network.

use crate::config::HttpMethod;
use crate::selector::Batch;
use async_trait::async_trait;
use event_store::StoreId;
use std::collections::BTreeMap;
use url::Url;

/// Where and how batches are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorTarget {
    pub endpoint: Url,
    pub method: HttpMethod,
}

/// Result of one dispatch attempt.
///
/// Every store id of the batch lands in exactly one bucket of the outcome,
/// except for `RetryableFailure`, which covers the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The collector accepted all of these events.
    Delivered(Vec<StoreId>),
    /// The collector reported per-event results.
    PartialFailure {
        succeeded: Vec<StoreId>,
        /// Retained and retried.
        failed: Vec<StoreId>,
        /// Permanently rejected; removed and reported.
        rejected: Vec<StoreId>,
    },
    /// Transport failure or retryable status. Nothing is removed.
    RetryableFailure { reason: String },
    /// The collector will never accept these events.
    TerminalFailure {
        store_ids: Vec<StoreId>,
        reason: String,
    },
}

impl DispatchOutcome {
    pub fn retryable(reason: impl Into<String>) -> Self {
        DispatchOutcome::RetryableFailure {
            reason: reason.into(),
        }
    }

    pub fn terminal(store_ids: Vec<StoreId>, reason: impl Into<String>) -> Self {
        DispatchOutcome::TerminalFailure {
            store_ids,
            reason: reason.into(),
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered(_) => "delivered",
            DispatchOutcome::PartialFailure { .. } => "partial_failure",
            DispatchOutcome::RetryableFailure { .. } => "retryable_failure",
            DispatchOutcome::TerminalFailure { .. } => "terminal_failure",
        }
    }
}

/// Sends batches to a collector.
///
/// Implementations never fail: every error becomes a [`DispatchOutcome`].
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, batch: &Batch, target: &CollectorTarget) -> DispatchOutcome;
}

/// Decides whether a non-2xx status is worth retrying.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    overrides: BTreeMap<u16, bool>,
}

impl StatusPolicy {
    pub fn with_overrides(overrides: BTreeMap<u16, bool>) -> Self {
        Self { overrides }
    }

    /// Overrides win. Otherwise 408, 429 and 5xx are retried and the rest
    /// of 4xx is terminal. Anything else unexpected is retried.
    pub fn is_retryable(&self, status: u16) -> bool {
        if let Some(retry) = self.overrides.get(&status) {
            return *retry;
        }
        match status {
            408 | 429 => true,
            400..=499 => false,
            _ => true,
        }
    }
}
