//! Ingestion pipeline for agent metric batches
//!
//! # Architecture
//!
//! ```text
//! RawBatch → [Normalizer] → snapshot ──────────────► save_snapshot (inline)
//!                  │
//!                  └──────→ points ─→ [BatchWriter] → save_series_points
//!                                 (or inline when direct_insert is set)
//! ```
//!
//! # Components
//!
//! - **Writer**: bounded queue and drain workers with size/interval flush
//! - **Backpressure**: queue-full policy (direct write or drop)
//! - **Metrics**: writer counters mirrored to Prometheus

pub mod backpressure;
pub mod metrics;
pub mod writer;

pub use backpressure::{OverflowController, OverflowOutcome};
pub use metrics::{WriterCounters, WriterStats};
pub use writer::{BatchWriter, EnqueueOutcome};

use crate::config::{DiagnosticsConfig, NormalizerConfig, WriterConfig};
use crate::error::IngestionError;
use crate::normalize::{NormalizationReport, Normalizer};
use crate::storage::MetricsStore;
use crate::types::{CanonicalSnapshot, RawBatch};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of one accepted batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReceipt {
    /// Resolved server identifier
    pub server_id: String,
    /// Snapshot instant
    pub time: DateTime<Utc>,
    /// Series points produced by normalization
    pub points: usize,
    /// Where the points went
    pub delivery: EnqueueOutcome,
}

/// Decode-free ingestion entry point shared by the HTTP layer
pub struct IngestionService {
    normalizer: Normalizer,
    store: Arc<dyn MetricsStore>,
    writer: Arc<BatchWriter>,
    direct_insert: bool,
    diagnostics: DiagnosticsConfig,
}

impl IngestionService {
    pub fn new(
        normalizer: Normalizer,
        store: Arc<dyn MetricsStore>,
        writer: Arc<BatchWriter>,
        direct_insert: bool,
        diagnostics: DiagnosticsConfig,
    ) -> Self {
        Self {
            normalizer,
            store,
            writer,
            direct_insert,
            diagnostics,
        }
    }

    /// Build the normalizer and start the writer from configuration
    pub fn start(
        normalizer: &NormalizerConfig,
        writer: &WriterConfig,
        diagnostics: &DiagnosticsConfig,
        store: Arc<dyn MetricsStore>,
    ) -> Result<Self, IngestionError> {
        let batch_writer = Arc::new(BatchWriter::start(writer, Arc::clone(&store))?);
        Ok(Self::new(
            Normalizer::new(normalizer.clone()),
            store,
            batch_writer,
            writer.direct_insert,
            diagnostics.clone(),
        ))
    }

    pub fn writer(&self) -> &Arc<BatchWriter> {
        &self.writer
    }

    /// Normalize and persist one batch
    ///
    /// The snapshot is written before this returns; series points are queued
    /// unless `direct_insert` is set.
    pub async fn ingest(
        &self,
        batch: &RawBatch,
        received_at: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestionError> {
        let result = self.ingest_inner(batch, received_at).await;
        crate::metrics::record_ingest(if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn ingest_inner(
        &self,
        batch: &RawBatch,
        received_at: DateTime<Utc>,
    ) -> Result<IngestReceipt, IngestionError> {
        let normalized = self.normalizer.normalize(batch, received_at);
        let snapshot = normalized.snapshot;
        if snapshot.server_id.is_empty() {
            return Err(IngestionError::Validation(
                "server_id or host tag required".to_string(),
            ));
        }

        let diagnostics = self
            .diagnostics
            .applies_to(&snapshot.server_id, &normalized.report.host);
        if diagnostics {
            self.log_diagnostics(batch, &snapshot, &normalized.report);
        }

        self.store
            .save_snapshot(&snapshot)
            .await
            .map_err(IngestionError::Snapshot)?;

        let point_count = normalized.points.len();
        let delivery = if point_count == 0 {
            EnqueueOutcome::default()
        } else if self.direct_insert {
            self.store
                .save_series_points(&normalized.points)
                .await
                .map_err(IngestionError::DirectWrite)?;
            crate::metrics::record_points("direct_insert", point_count);
            EnqueueOutcome {
                direct_written: point_count,
                ..Default::default()
            }
        } else {
            self.writer.enqueue(normalized.points).await?
        };

        debug!(
            server_id = %snapshot.server_id,
            time = %snapshot.time,
            points = point_count,
            queued = delivery.queued,
            dropped = delivery.dropped,
            "Ingested batch"
        );

        Ok(IngestReceipt {
            server_id: snapshot.server_id,
            time: snapshot.time,
            points: point_count,
            delivery,
        })
    }

    fn log_diagnostics(
        &self,
        batch: &RawBatch,
        snapshot: &CanonicalSnapshot,
        report: &NormalizationReport,
    ) {
        let server_id = snapshot.server_id.as_str();
        info!(
            server_id,
            host = %report.host,
            samples = report.sample_count,
            unknown_families = report.unknown_families,
            cpu = snapshot.cpu,
            memory = snapshot.memory,
            disk = snapshot.disk,
            "Ingest diagnostics"
        );

        if self.diagnostics.log_payload {
            match serde_json::to_string(batch) {
                Ok(payload) => info!(server_id, %payload, "Ingest payload"),
                Err(e) => warn!(server_id, error = %e, "Could not encode payload for logging"),
            }
        }

        if !report.saw_temperature_family {
            warn!(server_id, "No temperature family in batch");
        } else if !report.temperature_captured {
            warn!(server_id, "Temperature family present but no usable value");
        }

        if !report.saw_net_family {
            warn!(server_id, "No net family in batch");
        } else if snapshot.net_bytes_sent == 0 && snapshot.net_bytes_recv == 0 {
            warn!(server_id, "Net family reported zero bytes");
        }
    }
}
