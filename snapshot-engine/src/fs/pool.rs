//! Bounded worker pool for file copies.
//!
//! One pool is shared by every tree mirror in a run. The semaphore is the
//! only hard concurrency cap in the engine: it bounds open file handles
//! and disk contention no matter how many drives or destinations are
//! being mirrored at once.

use super::copy::{copy_file_task, CopyOutcome};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

/// Lifetime counters across every copy the pool has executed
#[derive(Debug, Default)]
pub struct PoolStats {
    pub copied: AtomicUsize,
    pub unchanged: AtomicUsize,
    pub failed: AtomicUsize,
    pub bytes: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl PoolStats {
    /// Highest number of copies observed running at the same time
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: CopyOutcome) {
        match outcome {
            CopyOutcome::Copied { bytes } => {
                self.copied.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            CopyOutcome::Unchanged => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            CopyOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            CopyOutcome::Excluded => {}
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copied ({} bytes), {} unchanged, {} failed",
            self.copied.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
            self.unchanged.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed)
        )
    }
}

/// Shared, cloneable handle to the copy workers
#[derive(Debug, Clone)]
pub struct CopyPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stats: Arc<PoolStats>,
}

impl CopyPool {
    /// Create a pool allowing at most `capacity` concurrent copies (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            stats: Arc::new(PoolStats::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Queue one copy. The returned handle resolves once the copy has run;
    /// it never resolves to an error outcome other than [`CopyOutcome::Failed`].
    pub fn submit(&self, source: PathBuf, destination: PathBuf) -> JoinHandle<CopyOutcome> {
        let semaphore = Arc::clone(&self.semaphore);
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    warn!("Copy pool closed, dropping {}: {}", source.display(), e);
                    stats.record(CopyOutcome::Failed);
                    return CopyOutcome::Failed;
                }
            };

            let now_active = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
            stats.peak_active.fetch_max(now_active, Ordering::SeqCst);

            let src = source.clone();
            let outcome = tokio::task::spawn_blocking(move || copy_file_task(&src, &destination))
                .await
                .unwrap_or_else(|e| {
                    warn!("Copy task for {} panicked: {}", source.display(), e);
                    CopyOutcome::Failed
                });

            stats.active.fetch_sub(1, Ordering::SeqCst);
            stats.record(outcome);
            outcome
        })
    }
}
