//! emitter-cli entry point.
//!
//! Usage:
//!   emitter-cli send --namespace app --endpoint https://collector/tp2 < events.jsonl
//!   emitter-cli stats [--namespace app]
//!   emitter-cli sweep --keep app,widget
//!   emitter-cli purge --namespace old

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use emitter::{EmitterConfig, HttpDispatcher, TracingSink, TrackerRegistry};
use event_store::{remove_unsent_except, EventStore, Payload, SqliteCatalog, StoreCatalog};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Drive namespaced event stores and deliver them to a collector.
#[derive(Parser, Debug)]
#[command(name = "emitter-cli")]
#[command(about = "Durable event queue and collector emitter")]
struct Args {
    /// Directory holding one store file per namespace.
    #[arg(long, env = "EMITTER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON emitter configuration file.
    #[arg(long, env = "EMITTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track JSON events (one object per line) and deliver them.
    Send {
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Collector endpoint, overrides the configuration.
        #[arg(long)]
        endpoint: Option<String>,

        /// Input file; stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Seconds to wait for the store to drain before exiting.
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Show pending events per namespace.
    Stats {
        #[arg(long)]
        namespace: Option<String>,
    },
    /// Purge every namespace not in the keep list.
    Sweep {
        #[arg(long, value_delimiter = ',', required = true)]
        keep: Vec<String>,
    },
    /// Delete all pending events of one namespace.
    Purge {
        #[arg(long)]
        namespace: String,
    },
}

#[derive(Debug, Serialize)]
struct StoreStats {
    namespace: String,
    pending: usize,
    total_bytes: u64,
    last_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SendSummary {
    namespace: String,
    tracked: usize,
    skipped: usize,
    pending: usize,
    stats: emitter::StatsSnapshot,
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join("emitter").join("stores"))
        .context("no data directory on this platform, pass --data-dir")
}

fn store_stats(store: &dyn EventStore) -> Result<StoreStats> {
    Ok(StoreStats {
        namespace: store.namespace().to_string(),
        pending: store.count()?,
        total_bytes: store.total_size()?,
        last_id: store.last_inserted_id()?.map(|id| id.as_i64()),
    })
}

/// Stats for one namespace, or every namespace when `None`.
///
/// An unknown namespace is an error; no store is created for it.
fn collect_stats(
    catalog: &dyn StoreCatalog,
    namespace: Option<&str>,
) -> Result<Vec<StoreStats>> {
    let known = catalog.namespaces()?;
    let namespaces = match namespace {
        Some(ns) if known.iter().any(|k| k == ns) => vec![ns.to_string()],
        Some(ns) => bail!("no event store for namespace {ns:?}"),
        None => known,
    };
    let mut stats = Vec::with_capacity(namespaces.len());
    for ns in &namespaces {
        stats.push(store_stats(catalog.open(ns)?.as_ref())?);
    }
    Ok(stats)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses one JSON object per non-blank line.
fn read_payloads(reader: impl BufRead) -> Result<(Vec<Payload>, usize)> {
    let mut payloads = Vec::new();
    let mut skipped = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Payload::from_json(&line) {
            Ok(payload) => payloads.push(payload),
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed event");
                skipped += 1;
            }
        }
    }
    Ok((payloads, skipped))
}

async fn send(
    catalog: Arc<SqliteCatalog>,
    mut config: EmitterConfig,
    namespace: &str,
    endpoint: Option<String>,
    input: Option<&Path>,
    timeout: Duration,
) -> Result<()> {
    if let Some(endpoint) = endpoint {
        config.endpoint = endpoint;
    }
    if config.endpoint.is_empty() {
        bail!("no collector endpoint, pass --endpoint or set EMITTER_ENDPOINT");
    }

    let (payloads, skipped) = match input {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening {}", path.display()))?;
            read_payloads(BufReader::new(file))?
        }
        None => read_payloads(std::io::stdin().lock())?,
    };

    let dispatcher = Arc::new(HttpDispatcher::from_config(&config)?);
    let registry = TrackerRegistry::with_sink(catalog, dispatcher, Arc::new(TracingSink));
    let tracker = registry.create(namespace, &config)?;

    let mut tracked = 0;
    for payload in &payloads {
        match tracker.track(payload) {
            Ok(_) => tracked += 1,
            Err(e) => warn!(namespace = %namespace, error = %e, "Event not tracked"),
        }
    }
    info!(namespace = %namespace, tracked, skipped, "Events tracked, draining");
    tracker.flush();

    let deadline = Instant::now() + timeout;
    loop {
        let pending = tracker.pending()?;
        if pending == 0 {
            break;
        }
        if Instant::now() >= deadline {
            warn!(namespace = %namespace, pending, "Deadline reached, events stay queued");
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, stopping");
                break;
            }
        }
    }

    let summary = SendSummary {
        namespace: namespace.to_string(),
        tracked,
        skipped,
        pending: tracker.pending()?,
        stats: tracker.stats(),
    };
    registry.shutdown_all().await;
    print_json(&summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "emitter-cli".into(),
        default_level: args.log_level.clone(),
        also_stderr: true,
        ..Default::default()
    });

    let data_dir = match args.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let config = EmitterConfig::load(args.config.as_deref())?;
    let catalog = Arc::new(SqliteCatalog::new(&data_dir, config.store_limits()));

    info!(data_dir = %data_dir.display(), "Configuration loaded");

    match args.command {
        Command::Send {
            namespace,
            endpoint,
            input,
            timeout_secs,
        } => {
            send(
                catalog,
                config,
                &namespace,
                endpoint,
                input.as_deref(),
                Duration::from_secs(timeout_secs),
            )
            .await
        }
        Command::Stats { namespace } => {
            print_json(&collect_stats(catalog.as_ref(), namespace.as_deref())?)
        }
        Command::Sweep { keep } => {
            let keep: Vec<&str> = keep.iter().map(String::as_str).collect();
            let report = remove_unsent_except(catalog.as_ref(), &keep)?;
            print_json(&serde_json::json!({
                "kept": report.kept,
                "purged": report.purged,
            }))
        }
        Command::Purge { namespace } => {
            let purged = catalog.purge(&namespace)?;
            print_json(&serde_json::json!({ "namespace": namespace, "purged": purged }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::StoreLimits;

    #[test]
    fn read_payloads_skips_blank_and_malformed_lines() {
        let input = "{\"e\":\"pv\"}\n\nnot json\n[1,2]\n{\"e\":\"se\",\"n\":2}\n";
        let (payloads, skipped) = read_payloads(input.as_bytes()).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(skipped, 2);
        assert_eq!(payloads[1].get("n").and_then(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn store_stats_reports_pending_events() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::new(dir.path(), StoreLimits::unbounded());
        let store = catalog.open("app").unwrap();
        store
            .enqueue(&Payload::builder().string("e", "pv").build())
            .unwrap();

        let stats = store_stats(store.as_ref()).unwrap();
        assert_eq!(stats.namespace, "app");
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.last_id, Some(1));
        assert_eq!(stats.total_bytes, 10);
    }

    #[test]
    fn stats_for_unknown_namespace_fails_without_creating_a_store() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::new(dir.path(), StoreLimits::unbounded());
        catalog.open("app").unwrap();

        assert!(collect_stats(&catalog, Some("ghost")).is_err());
        assert_eq!(catalog.namespaces().unwrap(), vec!["app".to_string()]);

        let stats = collect_stats(&catalog, Some("app")).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(collect_stats(&catalog, None).unwrap().len(), 1);
    }

    #[test]
    fn args_parse_keep_list() {
        let args = Args::parse_from(["emitter-cli", "sweep", "--keep", "app,widget"]);
        match args.command {
            Command::Sweep { keep } => assert_eq!(keep, vec!["app", "widget"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
