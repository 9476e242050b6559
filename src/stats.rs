//! Cumulative indexing counters shared by every worker.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::models::bulk::Action;

/// Thread-safe counters updated by workers after each flush and readable
/// by the caller at any time, including after close.
#[derive(Debug, Default)]
pub struct Stats {
    added: AtomicU64,
    flushed: AtomicU64,
    failed: AtomicU64,
    indexed: AtomicU64,
    created: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    requests: AtomicU64,
    bytes: AtomicU64,
}

impl Stats {
    pub(crate) fn inc_added(&self) {
        self.added.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self, bytes: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, action: Action) {
        self.flushed.fetch_add(1, Ordering::Relaxed);
        let counter = match action {
            Action::Index => &self.indexed,
            Action::Create => &self.created,
            Action::Update => &self.updated,
            Action::Delete => &self.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy, safe from concurrent mutation.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            num_added: self.added.load(Ordering::Relaxed),
            num_flushed: self.flushed.load(Ordering::Relaxed),
            num_failed: self.failed.load(Ordering::Relaxed),
            num_indexed: self.indexed.load(Ordering::Relaxed),
            num_created: self.created.load(Ordering::Relaxed),
            num_updated: self.updated.load(Ordering::Relaxed),
            num_deleted: self.deleted.load(Ordering::Relaxed),
            num_requests: self.requests.load(Ordering::Relaxed),
            num_bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub num_added: u64,
    pub num_flushed: u64,
    pub num_failed: u64,
    pub num_indexed: u64,
    pub num_created: u64,
    pub num_updated: u64,
    pub num_deleted: u64,
    pub num_requests: u64,
    pub num_bytes: u64,
}
