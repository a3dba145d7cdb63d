//! # Observability
//!
//! Logging setup for the emitter workspace.
//!
//! Binaries call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Library crates never install a
//! subscriber.
//!
//! Every line is written as JSON to a log file (by default
//! `<data dir>/emitter/logs/emitter.jsonl`), so a run can be inspected with
//! `tail -f ... | jq`. A `namespace` field on an event is lifted to the top
//! level of the line, which makes per-namespace filtering a one-liner:
//!
//! ```text
//! jq 'select(.namespace == "app")' emitter.jsonl
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "emitter-cli".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! ```

mod json_layer;
mod writer;

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{default_log_path, JsonlFileWriter};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the binary, written on every line.
    pub service_name: String,

    /// Filter used when `RUST_LOG` is not set.
    pub default_level: String,

    /// Log file location. Falls back to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Write JSONL to the log file.
    pub file_output: bool,

    /// Also emit human-readable logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            file_output: true,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging.
///
/// If the log file cannot be opened, logging continues on stderr only and
/// the failure is reported there. Calling this more than once is a no-op.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);

    let (writer, open_error) = match (&log_path, config.file_output) {
        (Some(path), true) => match JsonlFileWriter::open(path) {
            Ok(writer) => (Some(writer), None),
            Err(e) => (None, Some(e)),
        },
        _ => (None, None),
    };

    let json_layer = writer.map(|w| {
        JsonLayer::new(config.service_name.clone(), w).with_filter(env_filter(&config.default_level))
    });

    let stderr_wanted = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_wanted.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();
    if !installed {
        return;
    }

    match (open_error, log_path) {
        (Some(e), Some(path)) => tracing::warn!(
            log_path = %path.display(),
            error = %e,
            "log file unavailable, logging to stderr only"
        ),
        (None, Some(path)) if config.file_output => {
            tracing::debug!(log_path = %path.display(), "observability initialized")
        }
        _ => {}
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};
