use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use human_bytes::human_bytes;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use twelf::Layer;

use es_bulk_indexer::conf::{Config, Endpoint};
use es_bulk_indexer::{
    Action, BulkIndexer, BulkIndexerConfig, BulkItem, BulkOutcome, EsClient, RetryPolicy,
};

#[derive(Parser, Debug)]
#[command(name = "es-bulk-load", version, about = "Bulk-load a JSONL file into an index")]
struct Args {
    /// Endpoint configuration file (.toml or .json)
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,
    /// Endpoint name from the config file (default: the first one)
    #[arg(long, value_name = "NAME")]
    endpoint: Option<String>,
    /// JSONL file with one document per line
    #[arg(long, value_name = "PATH")]
    data: PathBuf,
    /// Target index (overrides the config file)
    #[arg(long)]
    index: Option<String>,
    /// Bulk action for every document
    #[arg(long, default_value = "index")]
    action: Action,
    /// Take each document's id from this top-level JSON field
    #[arg(long, value_name = "FIELD")]
    id_field: Option<String>,
    /// Worker count (0 = number of CPUs)
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// Flush threshold in bytes (0 = 5MB default)
    #[arg(long, default_value_t = 0)]
    flush_bytes: usize,
    /// Optional time-based flush trigger
    #[arg(long, value_name = "MS")]
    flush_interval_ms: Option<u64>,
    /// Append an audit line per bulk request to this file
    #[arg(long, value_name = "PATH")]
    audit_file: Option<String>,
}

fn load_config(path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    let layer = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Layer::Toml(path.clone()),
        Some("json") => Layer::Json(path.clone()),
        other => {
            return Err(format!(
                "unsupported config extension {:?} (expected .toml or .json)",
                other
            )
            .into())
        }
    };
    Ok(Config::with_layers(&[layer])?)
}

fn select_endpoint<'a>(
    config: &'a Config,
    name: &Option<String>,
) -> Result<&'a Endpoint, Box<dyn std::error::Error>> {
    let endpoints = config.get_endpoints();
    match name {
        Some(name) => endpoints
            .iter()
            .find(|endpoint| endpoint.get_name() == name)
            .ok_or_else(|| format!("endpoint '{}' not found in config", name).into()),
        None => endpoints
            .first()
            .ok_or_else(|| "config file defines no endpoints".into()),
    }
}

fn retry_policy(config: &Config) -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    let retry = config.get_bulk().get_retry();
    if let Some(max_retries) = retry.get_max_retries() {
        policy.max_retries = max_retries;
    }
    if let Some(statuses) = retry.get_retry_on_status() {
        policy.retry_on_status = statuses.clone();
    }
    if let Some(backoff_ms) = retry.get_backoff_ms() {
        policy.backoff = Duration::from_millis(backoff_ms);
    }
    policy
}

fn extract_id(line: &str, field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    match value.get(field)? {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let started_at = chrono::Utc::now();
    let started = Instant::now();

    let config = load_config(&args.config)?;
    let endpoint = select_endpoint(&config, &args.endpoint)?.clone();
    info!("Loading into endpoint '{}' at {}", endpoint.get_name(), endpoint.get_url());

    let mut client = EsClient::connect(endpoint).await?.with_retry(retry_policy(&config));
    if let Some(audit_file) = &args.audit_file {
        client = client.with_audit(audit_file).await;
    }
    if let Err(err) = client.log_server_info("destination").await {
        warn!("Could not read server info: {}", err);
    }
    let client = Arc::new(client);

    let bulk = config.get_bulk();
    let indexer = BulkIndexer::new(BulkIndexerConfig {
        client,
        index: args.index.clone().or_else(|| bulk.get_index().clone()),
        num_workers: if args.workers > 0 {
            args.workers
        } else {
            bulk.get_num_workers().unwrap_or(0)
        },
        flush_bytes: if args.flush_bytes > 0 {
            args.flush_bytes
        } else {
            bulk.get_flush_bytes().unwrap_or(0)
        },
        flush_interval: args
            .flush_interval_ms
            .or_else(|| bulk.get_flush_interval_ms())
            .map(Duration::from_millis),
    })?;

    let file = File::open(&args.data).await?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no: u64 = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        line_no += 1;

        let mut item = BulkItem::new(args.action).body(line.clone()).on_result(
            |meta, outcome| {
                if let BulkOutcome::Failure { response, error } = outcome {
                    match (error, response) {
                        (Some(err), _) => {
                            warn!("Document {:?} failed: {}", meta.document_id, err)
                        }
                        (None, Some(rejected)) => {
                            let reason = rejected
                                .error
                                .map(|cause| format!("{}: {}", cause.kind, cause.reason))
                                .unwrap_or_else(|| "unknown reason".into());
                            warn!(
                                "Document {:?} rejected with status {}: {}",
                                meta.document_id, rejected.status, reason
                            );
                        }
                        (None, None) => {
                            warn!("Document {:?} failed without details", meta.document_id)
                        }
                    }
                }
            },
        );
        if let Some(field) = &args.id_field {
            if let Some(id) = extract_id(&line, field) {
                item = item.document_id(id);
            }
        }
        indexer.add(item).await?;

        if line_no % 10_000 == 0 {
            let snapshot = indexer.stats();
            info!(
                "Progress: added={}, flushed={}, failed={}, volume={}",
                snapshot.num_added,
                snapshot.num_flushed,
                snapshot.num_failed,
                human_bytes(snapshot.num_bytes as f64)
            );
        }
    }

    let close_result = indexer.close().await;
    let snapshot = indexer.stats();
    if let Ok(stats_json) = serde_json::to_string(&snapshot) {
        tracing::debug!("Final stats: {}", stats_json);
    }
    info!(
        "Finished: added={}, flushed={}, failed={}, requests={}, volume={}, elapsed={:.1?}",
        snapshot.num_added,
        snapshot.num_flushed,
        snapshot.num_failed,
        snapshot.num_requests,
        human_bytes(snapshot.num_bytes as f64),
        started.elapsed()
    );
    info!(
        "Run window: {} .. {}",
        started_at.to_rfc3339(),
        chrono::Utc::now().to_rfc3339()
    );
    if let Some(usage) = memory_stats::memory_stats() {
        info!("Resident memory: {}", human_bytes(usage.physical_mem as f64));
    }

    if let Err(err) = close_result {
        warn!("Close reported errors: {}", err);
        std::process::exit(1);
    }
    if snapshot.num_failed > 0 {
        warn!(
            "Indexed {} document(s) with {} error(s)",
            snapshot.num_flushed, snapshot.num_failed
        );
        std::process::exit(1);
    }
    info!("Successfully indexed {} document(s)", snapshot.num_flushed);
    Ok(())
}
