//! Concurrent, buffering, auto-flushing bulk indexer.
//!
//! Producers call [`BulkIndexer::add`]; items are distributed round-robin to
//! a fixed pool of worker tasks. Each worker encodes items into a private
//! buffer and submits it as one `_bulk` request when the buffer crosses the
//! byte threshold, when the flush interval elapses, or when the indexer is
//! closed. Responses are paired with buffered items by position and reported
//! through per-item result handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::IndexerError;
use crate::es_client::EsClient;
use crate::models::bulk::{encode_item, Action, BulkResponse, BulkResponseItem, DocumentBody, ItemMeta};
use crate::stats::{Stats, StatsSnapshot};

pub const DEFAULT_FLUSH_BYTES: usize = 5_000_000;

/// Per-worker intake queue depth. Bounded so producers see backpressure
/// instead of unbounded memory growth.
const WORKER_QUEUE_DEPTH: usize = 32;

/// Outcome delivered to an item's result handler. Exactly one outcome is
/// delivered per accepted item, unless the process abandons `close` early.
#[derive(Debug)]
pub enum BulkOutcome {
    /// The server acknowledged the operation (2xx item status).
    Success(BulkResponseItem),
    /// The operation failed: either the server rejected this item
    /// (`response` set) or the batch never produced a per-item answer
    /// (`error` set: encoding, transport, or protocol mismatch).
    Failure {
        response: Option<BulkResponseItem>,
        error: Option<Arc<IndexerError>>,
    },
}

pub type ResultHandler = Arc<dyn Fn(&ItemMeta, BulkOutcome) + Send + Sync>;

/// One operation to submit. Build with the chained setters:
///
/// ```no_run
/// use es_bulk_indexer::{Action, BulkItem};
///
/// let item = BulkItem::new(Action::Index)
///     .document_id("1")
///     .body(r#"{"title":"Test"}"#);
/// ```
pub struct BulkItem {
    action: Action,
    index: Option<String>,
    document_id: Option<String>,
    body: Option<DocumentBody>,
    on_result: Option<ResultHandler>,
}

impl BulkItem {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            index: None,
            document_id: None,
            body: None,
            on_result: None,
        }
    }

    /// Target index, overriding the indexer-level default.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn body(mut self, body: impl Into<DocumentBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn on_result<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ItemMeta, BulkOutcome) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(handler));
        self
    }
}

impl std::fmt::Debug for BulkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkItem")
            .field("action", &self.action)
            .field("index", &self.index)
            .field("document_id", &self.document_id)
            .finish()
    }
}

#[derive(Debug)]
pub struct BulkIndexerConfig {
    pub client: Arc<EsClient>,
    /// Default target index for items that do not set one.
    pub index: Option<String>,
    /// Worker task count; 0 means available parallelism.
    pub num_workers: usize,
    /// Flush threshold in encoded bytes; 0 means [`DEFAULT_FLUSH_BYTES`].
    pub flush_bytes: usize,
    /// Optional time-based flush trigger, measured from the moment a
    /// worker's buffer becomes non-empty.
    pub flush_interval: Option<Duration>,
}

impl BulkIndexerConfig {
    pub fn new(client: Arc<EsClient>) -> Self {
        Self {
            client,
            index: None,
            num_workers: 0,
            flush_bytes: 0,
            flush_interval: None,
        }
    }
}

#[derive(Debug)]
pub struct BulkIndexer {
    senders: Mutex<Option<Vec<mpsc::Sender<BulkItem>>>>,
    handles: Mutex<Vec<JoinHandle<Result<(), Arc<IndexerError>>>>>,
    next_worker: AtomicUsize,
    stats: Arc<Stats>,
}

impl BulkIndexer {
    /// Validates the configuration and spawns the worker pool. Must be
    /// called from within a tokio runtime.
    pub fn new(config: BulkIndexerConfig) -> Result<Self, IndexerError> {
        if let Some(index) = &config.index {
            if index.is_empty() {
                return Err(IndexerError::Configuration(
                    "default index name must not be empty".into(),
                ));
            }
        }
        if config.flush_interval == Some(Duration::ZERO) {
            return Err(IndexerError::Configuration(
                "flush interval must be greater than zero".into(),
            ));
        }

        let num_workers = if config.num_workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.num_workers
        };
        let flush_bytes = if config.flush_bytes == 0 {
            DEFAULT_FLUSH_BYTES
        } else {
            config.flush_bytes
        };

        let stats = Arc::new(Stats::default());
        let mut senders = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
            let worker = Worker {
                id,
                client: Arc::clone(&config.client),
                rx,
                stats: Arc::clone(&stats),
                default_index: config.index.clone(),
                flush_bytes,
                flush_interval: config.flush_interval,
                payload: Vec::new(),
                entries: Vec::new(),
                deadline: None,
            };
            handles.push(tokio::spawn(worker.run()));
            senders.push(tx);
        }
        debug!(
            "Bulk indexer started: workers={}, flush_bytes={}",
            num_workers, flush_bytes
        );

        Ok(Self {
            senders: Mutex::new(Some(senders)),
            handles: Mutex::new(handles),
            next_worker: AtomicUsize::new(0),
            stats,
        })
    }

    /// Enqueues one item, waiting while the assigned worker's queue is
    /// full. Returns [`IndexerError::Closed`] after `close`.
    ///
    /// Cancellation is the usual Rust kind: dropping this future (for
    /// example under `tokio::time::timeout`) before it completes leaves the
    /// item un-enqueued and counts nothing.
    pub async fn add(&self, item: BulkItem) -> Result<(), IndexerError> {
        let tx = {
            let senders = self.senders.lock().await;
            let senders = senders.as_ref().ok_or(IndexerError::Closed)?;
            let slot = self.next_worker.fetch_add(1, Ordering::Relaxed) % senders.len();
            senders[slot].clone()
        };
        tx.send(item).await.map_err(|_| IndexerError::Closed)?;
        self.stats.inc_added();
        Ok(())
    }

    /// Stops intake, flushes every worker's remaining buffer and waits for
    /// completion. Final-flush failures are aggregated into
    /// [`IndexerError::Close`]. Idempotent: a second call returns `Ok(())`
    /// immediately.
    ///
    /// Abandoning this future early (caller-side timeout) leaves workers
    /// finishing their drain detached; items not yet dispatched may never
    /// see a callback. Treat an abandoned close as indeterminate.
    pub async fn close(&self) -> Result<(), IndexerError> {
        let senders = self.senders.lock().await.take();
        drop(senders); // closes every worker channel

        let handles: Vec<_> = {
            let mut handles = self.handles.lock().await;
            handles.drain(..).collect()
        };
        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(join_err) => errors.push(Arc::new(IndexerError::Join(join_err))),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(IndexerError::Close(errors))
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

struct PendingEntry {
    meta: ItemMeta,
    handler: Option<ResultHandler>,
}

/// One worker: owns its intake queue and flush buffer exclusively, so
/// buffer mutation needs no locking. Only `Stats` is shared.
struct Worker {
    id: usize,
    client: Arc<EsClient>,
    rx: mpsc::Receiver<BulkItem>,
    stats: Arc<Stats>,
    default_index: Option<String>,
    flush_bytes: usize,
    flush_interval: Option<Duration>,
    payload: Vec<u8>,
    entries: Vec<PendingEntry>,
    deadline: Option<Instant>,
}

impl Worker {
    async fn run(mut self) -> Result<(), Arc<IndexerError>> {
        debug!("Bulk worker {} started", self.id);
        loop {
            let received = match self.deadline {
                Some(deadline) => match timeout_at(deadline, self.rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => {
                        let _ = self.flush("interval").await;
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };
            match received {
                Some(item) => {
                    self.append(item);
                    if self.payload.len() >= self.flush_bytes {
                        let _ = self.flush("size").await;
                    }
                }
                None => {
                    // Channel closed: drain and report the final flush.
                    let result = self.flush("close").await;
                    debug!("Bulk worker {} stopped", self.id);
                    return result;
                }
            }
        }
    }

    /// Encodes the item into the flush buffer. Encoding failures are
    /// reported through the item's handler and do not abort the batch; the
    /// item is dropped, not re-queued, since its body source may already be
    /// consumed.
    fn append(&mut self, item: BulkItem) {
        let BulkItem {
            action,
            index,
            document_id,
            body,
            on_result,
        } = item;

        let index = match index.or_else(|| self.default_index.clone()) {
            Some(index) => index,
            None => {
                let meta = ItemMeta {
                    action,
                    index: String::new(),
                    document_id,
                };
                self.fail(&meta, &on_result, None, Some(Arc::new(IndexerError::MissingIndex)));
                return;
            }
        };
        let meta = ItemMeta {
            action,
            index,
            document_id,
        };

        let restore_len = self.payload.len();
        if let Err(err) = encode_item(&mut self.payload, &meta, body) {
            self.payload.truncate(restore_len);
            self.fail(&meta, &on_result, None, Some(Arc::new(err)));
            return;
        }
        if self.entries.is_empty() {
            self.deadline = self.flush_interval.map(|interval| Instant::now() + interval);
        }
        self.entries.push(PendingEntry {
            meta,
            handler: on_result,
        });
    }

    fn fail(
        &self,
        meta: &ItemMeta,
        handler: &Option<ResultHandler>,
        response: Option<BulkResponseItem>,
        error: Option<Arc<IndexerError>>,
    ) {
        self.stats.inc_failed();
        if let Some(handler) = handler {
            handler(meta, BulkOutcome::Failure { response, error });
        }
    }

    /// Submits the buffered batch as one bulk request. The buffer is
    /// cleared (keeping its capacity) whether the request succeeds or not;
    /// every buffered item receives exactly one callback.
    async fn flush(&mut self, reason: &str) -> Result<(), Arc<IndexerError>> {
        self.deadline = None;
        if self.entries.is_empty() {
            return Ok(());
        }
        let bytes = self.payload.len();
        debug!(
            "Worker {} flushing {} item(s), {} byte(s), trigger={}",
            self.id,
            self.entries.len(),
            bytes,
            reason
        );
        self.stats.record_request(bytes as u64);

        let result = self.client.bulk(self.payload.clone()).await;
        self.payload.clear();
        let entries = std::mem::take(&mut self.entries);

        match result {
            Err(err) => {
                warn!("Worker {} bulk request failed: {}", self.id, err);
                let err = Arc::new(IndexerError::Transport(err));
                for entry in &entries {
                    self.fail(&entry.meta, &entry.handler, None, Some(Arc::clone(&err)));
                }
                Err(err)
            }
            Ok(response) => self.dispatch(entries, response),
        }
    }

    /// Pairs response entries with buffered items by position and invokes
    /// their handlers. A count mismatch fails every unmatched item and is
    /// fatal for this flush.
    fn dispatch(
        &self,
        entries: Vec<PendingEntry>,
        response: BulkResponse,
    ) -> Result<(), Arc<IndexerError>> {
        let expected = entries.len();
        let actual = response.items.len();
        let mismatch = if actual != expected {
            warn!(
                "Worker {} bulk response count mismatch: expected {}, got {}",
                self.id, expected, actual
            );
            Some(Arc::new(IndexerError::ProtocolMismatch { expected, actual }))
        } else {
            None
        };

        let mut results = response.items.into_iter();
        for entry in entries {
            let paired = results.next().and_then(|map| map.into_values().next());
            match paired {
                Some(item) if item.is_success() => {
                    self.stats.record_success(entry.meta.action);
                    if let Some(handler) = &entry.handler {
                        handler(&entry.meta, BulkOutcome::Success(item));
                    }
                }
                Some(item) => self.fail(&entry.meta, &entry.handler, Some(item), None),
                None => {
                    let err = mismatch.clone().unwrap_or_else(|| {
                        Arc::new(IndexerError::ProtocolMismatch { expected, actual })
                    });
                    self.fail(&entry.meta, &entry.handler, None, Some(err));
                }
            }
        }

        match mismatch {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
