//! Writer counters
//!
//! Lock-free counters owned by the batch writer. Every update is mirrored to
//! the process-wide Prometheus registry in [`crate::metrics`].

use crate::metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Points accepted into the queue
    pub queued: u64,
    /// Points discarded because the queue was full
    pub dropped: u64,
    /// Points written synchronously after overflowing the queue
    pub direct_written: u64,
    /// Points persisted by workers
    pub flushed: u64,
    /// Successful worker flushes
    pub batches: u64,
    /// Failed worker flushes
    pub flush_errors: u64,
}

/// Atomic counters behind [`WriterStats`]
#[derive(Debug, Default)]
pub struct WriterCounters {
    queued: AtomicU64,
    dropped: AtomicU64,
    direct_written: AtomicU64,
    flushed: AtomicU64,
    batches: AtomicU64,
    flush_errors: AtomicU64,
}

impl WriterCounters {
    pub fn new() -> Self {
        Self::default()
    }

    // === Recording Methods ===

    #[inline]
    pub fn record_queued(&self, count: usize) {
        if count > 0 {
            self.queued.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_points("queued", count);
        }
    }

    #[inline]
    pub fn record_dropped(&self, count: usize) {
        if count > 0 {
            self.dropped.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_points("dropped", count);
        }
    }

    #[inline]
    pub fn record_direct_written(&self, count: usize) {
        if count > 0 {
            self.direct_written.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_points("direct_written", count);
        }
    }

    /// Record a worker flush outcome
    pub fn record_flush(&self, count: usize, duration_secs: f64, success: bool) {
        metrics::record_flush(duration_secs, success);
        if success {
            self.batches.fetch_add(1, Ordering::Relaxed);
            self.flushed.fetch_add(count as u64, Ordering::Relaxed);
            metrics::record_points("flushed", count);
        } else {
            self.flush_errors.fetch_add(1, Ordering::Relaxed);
            metrics::record_points("flush_failed", count);
        }
    }

    // === Snapshot ===

    pub fn snapshot(&self) -> WriterStats {
        WriterStats {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            direct_written: self.direct_written.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
        }
    }
}
