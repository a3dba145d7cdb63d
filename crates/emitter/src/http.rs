//! HTTP dispatcher.
//!
//! POST sends the batch as a JSON array of event objects. GET sends one
//! event per request, its fields as query parameters. A 207 response to a
//! POST carries a JSON array of per-event status codes in batch order.

use crate::config::{EmitterConfig, HttpMethod};
use crate::dispatcher::{CollectorTarget, DispatchOutcome, Dispatcher, StatusPolicy};
use crate::error::EmitterResult;
use crate::selector::Batch;
use async_trait::async_trait;
use event_store::{Payload, StoreId};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// [`Dispatcher`] backed by a pooled `reqwest` client.
pub struct HttpDispatcher {
    client: Client,
    policy: StatusPolicy,
}

impl HttpDispatcher {
    pub fn new(timeout: Duration, policy: StatusPolicy) -> EmitterResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("emitter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn from_config(config: &EmitterConfig) -> EmitterResult<Self> {
        Self::new(config.request_timeout(), config.status_policy())
    }

    async fn post_batch(&self, batch: &Batch, endpoint: &Url) -> DispatchOutcome {
        let body: Vec<&Payload> = batch.events.iter().map(|e| &e.payload).collect();
        let result = self.client.post(endpoint.clone()).json(&body).send().await;
        match result {
            Ok(response) => self.classify(response, batch.store_ids()).await,
            Err(e) => transport_failure(e),
        }
    }

    async fn get_single(&self, batch: &Batch, endpoint: &Url) -> DispatchOutcome {
        let Some((first, rest)) = batch.events.split_first() else {
            return DispatchOutcome::Delivered(Vec::new());
        };

        let result = self
            .client
            .get(endpoint.clone())
            .query(&first.payload.query_pairs())
            .send()
            .await;
        let outcome = match result {
            Ok(response) => self.classify(response, vec![first.store_id]).await,
            Err(e) => transport_failure(e),
        };

        if rest.is_empty() {
            return outcome;
        }

        // GET carries one event; whatever else was handed over stays queued.
        let retained: Vec<StoreId> = rest.iter().map(|e| e.store_id).collect();
        match outcome {
            DispatchOutcome::Delivered(succeeded) => DispatchOutcome::PartialFailure {
                succeeded,
                failed: retained,
                rejected: Vec::new(),
            },
            DispatchOutcome::TerminalFailure { store_ids, .. } => DispatchOutcome::PartialFailure {
                succeeded: Vec::new(),
                failed: retained,
                rejected: store_ids,
            },
            other => other,
        }
    }

    async fn classify(&self, response: Response, ids: Vec<StoreId>) -> DispatchOutcome {
        let status = response.status();

        if status == StatusCode::MULTI_STATUS {
            return match response.text().await {
                Ok(body) => self.per_event_outcome(&body, ids),
                Err(e) => transport_failure(e),
            };
        }
        if status.is_success() {
            return DispatchOutcome::Delivered(ids);
        }
        if self.policy.is_retryable(status.as_u16()) {
            DispatchOutcome::retryable(format!("collector returned {status}"))
        } else {
            DispatchOutcome::terminal(ids, format!("collector returned {status}"))
        }
    }

    /// Splits a batch by the per-event statuses of a 207 body.
    fn per_event_outcome(&self, body: &str, ids: Vec<StoreId>) -> DispatchOutcome {
        let statuses: Vec<u16> = match serde_json::from_str(body) {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(error = %e, "Unreadable multi-status body");
                return DispatchOutcome::retryable("malformed multi-status body");
            }
        };
        if statuses.len() != ids.len() {
            warn!(
                expected = ids.len(),
                got = statuses.len(),
                "Multi-status body does not match batch"
            );
            return DispatchOutcome::retryable("multi-status length mismatch");
        }

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut rejected = Vec::new();
        for (id, status) in ids.into_iter().zip(statuses) {
            if (200..300).contains(&status) {
                succeeded.push(id);
            } else if self.policy.is_retryable(status) {
                failed.push(id);
            } else {
                rejected.push(id);
            }
        }

        match (failed.is_empty(), rejected.is_empty()) {
            (true, true) => DispatchOutcome::Delivered(succeeded),
            (true, false) if succeeded.is_empty() => {
                DispatchOutcome::terminal(rejected, "collector rejected every event")
            }
            _ => DispatchOutcome::PartialFailure {
                succeeded,
                failed,
                rejected,
            },
        }
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, batch: &Batch, target: &CollectorTarget) -> DispatchOutcome {
        debug!(
            batch_id = %batch.batch_id,
            events = batch.len(),
            bytes = batch.byte_size(),
            method = ?target.method,
            "Dispatching batch"
        );
        match target.method {
            HttpMethod::Post => self.post_batch(batch, &target.endpoint).await,
            HttpMethod::Get => self.get_single(batch, &target.endpoint).await,
        }
    }
}

fn transport_failure(e: reqwest::Error) -> DispatchOutcome {
    let reason = if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        format!("transport error: {e}")
    };
    DispatchOutcome::retryable(reason)
}
