//! Per-run shared state for the fetch pipeline
//!
//! One `SharedState` is constructed per orchestrator run and passed
//! explicitly to the resolver workers and the download consumer. Nothing in
//! the pipeline lives in process-wide globals, so multiple runs can coexist
//! in one process (and in one test binary).

use crate::types::UserId;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tokio::sync::Semaphore;
use url::Url;

/// Buffer size of the resolve-to-download hand-off queue
pub(crate) const DOWNLOAD_CHANNEL_BUFFER: usize = 64;

/// A resolved avatar URL handed from a resolver worker to the download
/// consumer.
#[derive(Debug)]
pub(crate) struct DownloadRequest {
    /// The user the image belongs to
    pub user_id: UserId,
    /// Canonical image URL, without the size parameter
    pub url: Url,
}

/// State shared between the orchestrator, its resolver workers, and the
/// download consumer for the duration of one run.
#[derive(Debug)]
pub(crate) struct SharedState {
    /// Bounds the number of concurrently running resolver workers
    pub resolve_limit: Arc<Semaphore>,
    /// URLs successfully resolved across all rounds
    pub resolved: AtomicU64,
    /// Files written to the cache across all rounds
    pub downloaded: AtomicU64,
    /// Classified per-task failures across all rounds
    pub failed: AtomicU64,
}

impl SharedState {
    /// Create run-local state with the given resolver pool size.
    pub fn new(max_concurrent_resolves: usize) -> Arc<Self> {
        Arc::new(Self {
            resolve_limit: Arc::new(Semaphore::new(max_concurrent_resolves)),
            resolved: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }
}
