//! Bulk-indexing client for Elasticsearch-compatible search engines.
//!
//! A fixed pool of worker tasks buffers submitted operations and flushes
//! them as newline-delimited `_bulk` requests when a size threshold, an
//! optional interval, or a close is hit. See [`BulkIndexer`].

pub mod audit;
pub mod conf;
pub mod error;
pub mod es_client;
pub mod indexer;
pub mod models;
pub mod stats;

pub use conf::Endpoint;
pub use error::IndexerError;
pub use es_client::{EsClient, RetryPolicy, TransportError};
pub use indexer::{BulkIndexer, BulkIndexerConfig, BulkItem, BulkOutcome, ResultHandler, DEFAULT_FLUSH_BYTES};
pub use models::bulk::{Action, BulkResponse, BulkResponseItem, DocumentBody, ErrorCause, ItemMeta};
pub use stats::{Stats, StatsSnapshot};
