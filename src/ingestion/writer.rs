//! Batched persistence of series points
//!
//! A bounded queue feeds `num_workers` drain tasks. Each worker keeps a
//! private buffer and flushes it through [`MetricsStore::save_series_points`]
//! when the buffer reaches `batch_size` or when the flush interval ticks.
//!
//! ```text
//! enqueue ──try_send──► [ bounded mpsc ] ──► worker 0 ─┐
//!    │                                  ├──► worker 1 ─┼─► save_series_points
//!    │ full                             └──► worker N ─┘
//!    ▼
//! OverflowController (direct write | drop)
//! ```
//!
//! A failed flush is logged and counted, and its points are discarded.

use crate::config::WriterConfig;
use crate::error::IngestionError;
use crate::metrics;
use crate::storage::MetricsStore;
use crate::types::SeriesPoint;

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::backpressure::{OverflowController, OverflowOutcome};
use super::metrics::{WriterCounters, WriterStats};

/// Result of handing a batch of points to the writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    /// Points accepted into the queue
    pub queued: usize,
    /// Overflow written synchronously
    pub direct_written: usize,
    /// Overflow discarded
    pub dropped: usize,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<SeriesPoint>>>;

/// Bounded queue plus drain workers
pub struct BatchWriter {
    /// Taken on shutdown to close the queue
    sender: Mutex<Option<mpsc::Sender<SeriesPoint>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    overflow: OverflowController,
    counters: Arc<WriterCounters>,
    capacity: usize,
}

impl BatchWriter {
    /// Validate the configuration and spawn the workers
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(config: &WriterConfig, store: Arc<dyn MetricsStore>) -> Result<Self, IngestionError> {
        if config.queue_capacity == 0 {
            return Err(IngestionError::ConfigError(
                "queue_capacity must be > 0".to_string(),
            ));
        }
        if config.num_workers == 0 {
            return Err(IngestionError::ConfigError(
                "num_workers must be > 0".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(IngestionError::ConfigError(
                "batch_size must be > 0".to_string(),
            ));
        }
        if config.flush_interval_ms == 0 {
            return Err(IngestionError::ConfigError(
                "flush_interval_ms must be > 0".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(WriterCounters::new());

        let workers = (0..config.num_workers)
            .map(|id| {
                let worker = DrainWorker {
                    id,
                    rx: Arc::clone(&rx),
                    store: Arc::clone(&store),
                    counters: Arc::clone(&counters),
                    batch_size: config.batch_size,
                    flush_interval: config.flush_interval(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(
            workers = config.num_workers,
            queue_capacity = config.queue_capacity,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval_ms,
            overflow = ?config.overflow,
            "Batch writer started"
        );

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            overflow: OverflowController::new(config.overflow, store, Arc::clone(&counters)),
            counters,
            capacity: config.queue_capacity,
        })
    }

    /// Queue points without waiting for space
    ///
    /// Points that do not fit go through the overflow policy. Only a failed
    /// direct write or a closed queue is reported as an error.
    pub async fn enqueue(&self, points: Vec<SeriesPoint>) -> Result<EnqueueOutcome, IngestionError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| IngestionError::ChannelClosed("writer is shut down".to_string()))?;

        let mut outcome = EnqueueOutcome::default();
        let mut overflow = Vec::new();
        for point in points {
            match sender.try_send(point) {
                Ok(()) => outcome.queued += 1,
                Err(TrySendError::Full(point)) => overflow.push(point),
                Err(TrySendError::Closed(_)) => {
                    return Err(IngestionError::ChannelClosed(
                        "writer queue closed".to_string(),
                    ))
                }
            }
        }

        self.counters.record_queued(outcome.queued);
        metrics::update_queue_depth(self.capacity.saturating_sub(sender.capacity()));
        drop(sender);

        if !overflow.is_empty() {
            match self.overflow.handle(overflow).await? {
                OverflowOutcome::DirectWritten(n) => outcome.direct_written = n,
                OverflowOutcome::Dropped(n) => outcome.dropped = n,
            }
        }
        Ok(outcome)
    }

    /// Points currently waiting in the queue
    pub fn queue_depth(&self) -> usize {
        self.sender
            .lock()
            .as_ref()
            .map_or(0, |tx| self.capacity.saturating_sub(tx.capacity()))
    }

    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }

    /// Close the queue, drain it, flush every buffer and join the workers
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), IngestionError> {
        drop(self.sender.lock().take());
        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return Ok(());
        }

        debug!(workers = workers.len(), "Draining batch writer");
        let mut failures = 0;
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Writer worker terminated abnormally");
                failures += 1;
            }
        }
        metrics::update_queue_depth(0);

        let stats = self.stats();
        info!(
            flushed = stats.flushed,
            batches = stats.batches,
            flush_errors = stats.flush_errors,
            dropped = stats.dropped,
            "Batch writer stopped"
        );

        if failures > 0 {
            return Err(IngestionError::ShutdownError(format!(
                "{} writer worker(s) failed",
                failures
            )));
        }
        Ok(())
    }
}

/// One drain task
struct DrainWorker {
    id: usize,
    rx: SharedReceiver,
    store: Arc<dyn MetricsStore>,
    counters: Arc<WriterCounters>,
    batch_size: usize,
    flush_interval: Duration,
}

impl DrainWorker {
    async fn run(self) {
        let mut buffer = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                received = async { self.rx.lock().await.recv().await } => match received {
                    Some(point) => {
                        buffer.push(point);
                        if buffer.len() >= self.batch_size {
                            self.flush(&mut buffer).await;
                        }
                    }
                    None => {
                        self.flush(&mut buffer).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        self.flush(&mut buffer).await;
                    }
                }
            }
        }

        debug!(worker = self.id, "Writer worker exited");
    }

    async fn flush(&self, buffer: &mut Vec<SeriesPoint>) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(buffer, Vec::with_capacity(self.batch_size));
        let start = Instant::now();

        match self.store.save_series_points(&batch).await {
            Ok(()) => {
                self.counters
                    .record_flush(batch.len(), start.elapsed().as_secs_f64(), true);
                debug!(worker = self.id, points = batch.len(), "Flushed series points");
            }
            Err(e) => {
                self.counters
                    .record_flush(batch.len(), start.elapsed().as_secs_f64(), false);
                error!(
                    worker = self.id,
                    points = batch.len(),
                    error = %e,
                    "Failed to flush series points, batch discarded"
                );
            }
        }
    }
}
