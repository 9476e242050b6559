use std::sync::Arc;

use thiserror::Error;

use crate::es_client::TransportError;
use crate::models::bulk::Action;

/// Errors produced by the bulk indexer.
///
/// Per-item failures (encoding, transport, rejected operations) are also
/// delivered to the item's result handler; the variants here are what the
/// `add`/`close` calls themselves return.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `add` was called after `close`.
    #[error("bulk indexer is closed")]
    Closed,

    /// The item carried no index and the indexer has no default index.
    #[error("bulk item has no target index and no default index is configured")]
    MissingIndex,

    #[error("bulk action '{}' requires a document body", .0.as_str())]
    MissingBody(Action),

    /// Reading the item's body source failed. The source may be consumed,
    /// so the item is dropped rather than re-queued.
    #[error("failed to read bulk item body: {0}")]
    BodyRead(#[source] std::io::Error),

    #[error("failed to serialize bulk action metadata: {0}")]
    Meta(#[from] serde_json::Error),

    /// The whole bulk request failed at the HTTP layer, after the
    /// transport's own retry policy was exhausted.
    #[error("bulk request failed: {0}")]
    Transport(#[from] TransportError),

    /// The response array length does not match the submitted batch.
    /// Fatal for that flush; unmatched items are failed with this error.
    #[error("bulk response contained {actual} items, expected {expected}")]
    ProtocolMismatch { expected: usize, actual: usize },

    #[error("{} worker flush(es) failed during close", .0.len())]
    Close(Vec<Arc<IndexerError>>),

    #[error("bulk worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
