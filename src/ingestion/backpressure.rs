//! Queue-full handling for the batch writer
//!
//! Enqueue never waits for queue space. Points that do not fit are handed to
//! the [`OverflowController`], which applies the configured
//! [`OverflowPolicy`]:
//!
//! - `DirectWrite`: persist the overflow synchronously in one call and return
//!   any storage error to the caller
//! - `Drop`: discard the overflow and count it

use crate::config::OverflowPolicy;
use crate::error::IngestionError;
use crate::storage::MetricsStore;
use crate::types::SeriesPoint;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::metrics::WriterCounters;

/// Minimum interval between queue-full warnings
const WARNING_COOLDOWN: Duration = Duration::from_secs(30);

/// What happened to a batch of overflowing points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowOutcome {
    /// Points were written synchronously
    DirectWritten(usize),
    /// Points were discarded
    Dropped(usize),
}

/// Applies the overflow policy
pub struct OverflowController {
    policy: OverflowPolicy,
    store: Arc<dyn MetricsStore>,
    counters: Arc<WriterCounters>,
    last_warning: Mutex<Option<Instant>>,
}

impl OverflowController {
    pub fn new(
        policy: OverflowPolicy,
        store: Arc<dyn MetricsStore>,
        counters: Arc<WriterCounters>,
    ) -> Self {
        Self {
            policy,
            store,
            counters,
            last_warning: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Handle points that did not fit into the queue
    pub async fn handle(&self, points: Vec<SeriesPoint>) -> Result<OverflowOutcome, IngestionError> {
        let count = points.len();
        self.warn_queue_full(count);

        match self.policy {
            OverflowPolicy::Drop => {
                self.counters.record_dropped(count);
                Ok(OverflowOutcome::Dropped(count))
            }
            OverflowPolicy::DirectWrite => {
                self.store
                    .save_series_points(&points)
                    .await
                    .map_err(IngestionError::DirectWrite)?;
                self.counters.record_direct_written(count);
                Ok(OverflowOutcome::DirectWritten(count))
            }
        }
    }

    /// Rate-limited warning so a saturated queue does not flood the log
    fn warn_queue_full(&self, count: usize) {
        let now = Instant::now();
        let mut last = self.last_warning.lock();
        let due = last.map_or(true, |at| now.duration_since(at) >= WARNING_COOLDOWN);
        if due {
            *last = Some(now);
            drop(last);
            warn!(
                points = count,
                policy = ?self.policy,
                "Writer queue full, applying overflow policy"
            );
        }
    }
}
