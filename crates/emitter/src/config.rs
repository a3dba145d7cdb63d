//! Emitter configuration.

use crate::backoff::Backoff;
use crate::dispatcher::{CollectorTarget, StatusPolicy};
use crate::error::{EmitterError, EmitterResult};
use event_store::StoreLimits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// HTTP method used to reach the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// One event per request, encoded as a query string.
    Get,
    /// Batches of events as a JSON array body.
    #[default]
    Post,
}

impl std::str::FromStr for HttpMethod {
    type Err = EmitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(EmitterError::Config(format!(
                "unknown HTTP method: {other}"
            ))),
        }
    }
}

/// How many events go into one POST request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferOption {
    Single,
    #[default]
    SmallGroup,
    LargeGroup,
}

impl BufferOption {
    pub fn events_per_request(self) -> usize {
        match self {
            BufferOption::Single => 1,
            BufferOption::SmallGroup => 10,
            BufferOption::LargeGroup => 25,
        }
    }
}

/// What to do with an event that exceeds the byte limit on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedPolicy {
    /// Remove it from the store and report it as dropped.
    Drop,
    /// Send it in a batch of its own.
    #[default]
    SendAlone,
}

/// Retry delay settings, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay that may be shaved off at random, in `[0, 0.5)`.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.2,
        }
    }
}

/// Configuration for one namespace's emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Collector endpoint. Must be an http(s) URL.
    pub endpoint: String,
    pub method: HttpMethod,
    pub buffer_option: BufferOption,
    /// Upper bound on events fetched per selection.
    pub emit_range: usize,
    pub byte_limit_get: u64,
    pub byte_limit_post: u64,
    /// Period of the timer that re-advances an idle emitter.
    pub tick_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub backoff: BackoffConfig,
    /// Per-status overrides: `true` retries, `false` drops.
    pub retry_status_codes: BTreeMap<u16, bool>,
    pub oversized_policy: OversizedPolicy,
    /// Ceiling on the bytes a namespace's store may hold.
    pub max_store_bytes: Option<u64>,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            method: HttpMethod::default(),
            buffer_option: BufferOption::default(),
            emit_range: 150,
            byte_limit_get: 40_000,
            byte_limit_post: 40_000,
            tick_interval_ms: 5_000,
            request_timeout_secs: 30,
            backoff: BackoffConfig::default(),
            retry_status_codes: BTreeMap::new(),
            oversized_policy: OversizedPolicy::default(),
            max_store_bytes: None,
        }
    }
}

impl EmitterConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_file(path: &Path) -> EmitterResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EmitterConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults.
    pub fn load_from_env() -> EmitterResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> EmitterResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Overrides fields from `EMITTER_*` environment variables.
    pub fn apply_env(&mut self) -> EmitterResult<()> {
        if let Ok(endpoint) = std::env::var("EMITTER_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(method) = std::env::var("EMITTER_METHOD") {
            self.method = method.parse()?;
        }
        if let Some(v) = env_number("EMITTER_EMIT_RANGE")? {
            self.emit_range = v as usize;
        }
        if let Some(v) = env_number("EMITTER_BYTE_LIMIT_GET")? {
            self.byte_limit_get = v;
        }
        if let Some(v) = env_number("EMITTER_BYTE_LIMIT_POST")? {
            self.byte_limit_post = v;
        }
        if let Some(v) = env_number("EMITTER_TICK_MS")? {
            self.tick_interval_ms = v;
        }
        if let Some(v) = env_number("EMITTER_REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = env_number("EMITTER_BACKOFF_BASE_MS")? {
            self.backoff.base_delay_ms = v;
        }
        if let Some(v) = env_number("EMITTER_BACKOFF_MAX_MS")? {
            self.backoff.max_delay_ms = v;
        }
        if let Some(v) = env_number("EMITTER_MAX_STORE_BYTES")? {
            self.max_store_bytes = Some(v);
        }
        Ok(())
    }

    /// Checks the configuration and resolves the collector target.
    pub fn validate(&self) -> EmitterResult<CollectorTarget> {
        let endpoint = Url::parse(&self.endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(EmitterError::Config(format!(
                "endpoint must be http or https, got {}",
                endpoint.scheme()
            )));
        }
        if self.emit_range == 0 {
            return Err(EmitterError::Config("emit_range must be at least 1".into()));
        }
        if self.byte_limit() == 0 {
            return Err(EmitterError::Config("byte limit must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(EmitterError::Config("tick interval must be positive".into()));
        }
        if self.backoff.base_delay_ms == 0 || self.backoff.max_delay_ms < self.backoff.base_delay_ms
        {
            return Err(EmitterError::Config(
                "backoff requires 0 < base_delay_ms <= max_delay_ms".into(),
            ));
        }
        if !(0.0..0.5).contains(&self.backoff.jitter) {
            return Err(EmitterError::Config(
                "backoff jitter must be in [0, 0.5)".into(),
            ));
        }
        Ok(CollectorTarget {
            endpoint,
            method: self.method,
        })
    }

    /// Maximum events per batch. GET always sends one.
    pub fn max_events_per_batch(&self) -> usize {
        match self.method {
            HttpMethod::Get => 1,
            HttpMethod::Post => self.buffer_option.events_per_request().min(self.emit_range),
        }
    }

    /// Byte limit for the configured method.
    pub fn byte_limit(&self) -> u64 {
        match self.method {
            HttpMethod::Get => self.byte_limit_get,
            HttpMethod::Post => self.byte_limit_post,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.base_delay_ms),
            Duration::from_millis(self.backoff.max_delay_ms),
            self.backoff.jitter,
        )
    }

    pub fn status_policy(&self) -> StatusPolicy {
        StatusPolicy::with_overrides(self.retry_status_codes.clone())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_total_bytes: self.max_store_bytes,
        }
    }
}

fn env_number(key: &str) -> EmitterResult<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EmitterError::Config(format!("{key} must be a number, got {value:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmitterConfig::default();
        assert_eq!(config.method, HttpMethod::Post);
        assert_eq!(config.emit_range, 150);
        assert_eq!(config.byte_limit_post, 40_000);
        assert_eq!(config.max_events_per_batch(), 10);
        assert!(config.validate().is_err(), "empty endpoint must not validate");
    }

    #[test]
    fn test_get_forces_single_event_batches() {
        let mut config = EmitterConfig::new("http://localhost/i");
        config.buffer_option = BufferOption::LargeGroup;
        config.method = HttpMethod::Get;
        assert_eq!(config.max_events_per_batch(), 1);

        config.method = HttpMethod::Post;
        assert_eq!(config.max_events_per_batch(), 25);
        config.emit_range = 5;
        assert_eq!(config.max_events_per_batch(), 5);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EmitterConfig::new("ftp://collector.example.com");
        assert!(matches!(config.validate(), Err(EmitterError::Config(_))));

        config.endpoint = "not a url".into();
        assert!(matches!(config.validate(), Err(EmitterError::Url(_))));

        config.endpoint = "https://collector.example.com/com.acme/tp2".into();
        config.backoff.jitter = 0.5;
        assert!(config.validate().is_err());

        config.backoff.jitter = 0.0;
        let target = config.validate().unwrap();
        assert_eq!(target.endpoint.path(), "/com.acme/tp2");
    }

    #[test]
    fn test_load_from_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emitter.json");
        std::fs::write(
            &path,
            r#"{"endpoint":"https://c.example.com","method":"GET","retry_status_codes":{"403":true},"oversized_policy":"drop"}"#,
        )
        .unwrap();

        let config = EmitterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.method, HttpMethod::Get);
        assert_eq!(config.oversized_policy, OversizedPolicy::Drop);
        assert_eq!(config.retry_status_codes.get(&403), Some(&true));
        assert_eq!(config.tick_interval_ms, 5_000);
        assert_eq!(config.backoff.max_delay_ms, 60_000);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert!("PUT".parse::<HttpMethod>().is_err());
    }
}
