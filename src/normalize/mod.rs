//! Metric normalization
//!
//! Turns one agent batch into a canonical snapshot plus a flat list of series
//! points. Normalization is pure: no I/O, no shared state, and the output is
//! fully determined by the sample order and the `received_at` instant.
//!
//! # Architecture
//!
//! ```text
//! RawBatch ──► identity pre-pass ──► family dispatch ──► finalize
//!              (server_id, geo,       (lookup table,     (disk/net
//!               snapshot time)         first-match,       aggregates)
//!                                      best-rank)
//! ```
//!
//! Family policies live in [`families`]; value coercion in [`coerce`].

pub mod coerce;
mod families;

use crate::config::NormalizerConfig;
use crate::types::{
    checked_epoch_seconds, epoch_seconds, CanonicalSnapshot, RawBatch, RawSample, SeriesPoint,
};
use chrono::{DateTime, Utc};

pub use families::FAMILY_NAMES;

/// Placeholder some agents send when hostname templating is not expanded
const HOSTNAME_PLACEHOLDER: &str = "$HOSTNAME";

/// Diagnostic facts gathered while normalizing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Samples in the batch
    pub sample_count: usize,
    /// First non-empty `host` tag
    pub host: String,
    /// A temperature family sample was present
    pub saw_temperature_family: bool,
    /// A temperature value was captured on the snapshot
    pub temperature_captured: bool,
    /// A `net` sample was present
    pub saw_net_family: bool,
    /// Samples whose family has no handler
    pub unknown_families: usize,
}

/// Normalization output
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Canonical snapshot (exactly one per batch)
    pub snapshot: CanonicalSnapshot,
    /// Series points in emission order
    pub points: Vec<SeriesPoint>,
    /// Diagnostics
    pub report: NormalizationReport,
}

/// Batch normalizer
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    /// Create a normalizer
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizer configuration
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize a batch
    ///
    /// `received_at` is used as the snapshot time when no sample carries a
    /// positive timestamp.
    pub fn normalize(&self, batch: &RawBatch, received_at: DateTime<Utc>) -> Normalized {
        let (server_id, host) = resolve_identity(&batch.metrics);
        let mut snapshot = CanonicalSnapshot {
            server_id: server_id.to_string(),
            time: snapshot_time(&batch.metrics).unwrap_or(received_at),
            ..Default::default()
        };
        self.apply_geo_tags(&mut snapshot, &batch.metrics);

        let mut report = NormalizationReport {
            sample_count: batch.len(),
            host: host.to_string(),
            ..Default::default()
        };

        let mut state = families::BatchState::new(snapshot);
        for sample in &batch.metrics {
            let time = self.point_time(sample, state.snapshot.time);
            if !families::dispatch(&mut state, sample, time) {
                report.unknown_families += 1;
            }
        }

        let (snapshot, points, flags) = state.finish();
        report.saw_temperature_family = flags.saw_temperature;
        report.temperature_captured = flags.temperature_captured;
        report.saw_net_family = flags.saw_net;

        Normalized {
            snapshot,
            points,
            report,
        }
    }

    fn point_time(&self, sample: &RawSample, snapshot_time: DateTime<Utc>) -> DateTime<Utc> {
        let own = Some(sample.timestamp)
            .filter(|ts| *ts > 0.0)
            .and_then(checked_epoch_seconds);
        match own {
            Some(time) => time,
            None if self.config.point_time_fallback => snapshot_time,
            None => epoch_seconds(sample.timestamp),
        }
    }

    fn apply_geo_tags(&self, snapshot: &mut CanonicalSnapshot, samples: &[RawSample]) {
        let prefix = self.config.geo_tag_prefix.as_str();
        for sample in samples.iter().filter(|s| s.name.starts_with(prefix)) {
            fill_first(&mut snapshot.city, sample.tag_str("city"));
            fill_first(&mut snapshot.city_name, sample.tag_str("city_full_name"));
            fill_first(&mut snapshot.region, sample.tag_str("code"));
            fill_first(&mut snapshot.region_name, sample.tag_str("name"));
        }
    }
}

fn fill_first(slot: &mut String, value: &str) {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_string();
    }
}

/// Resolve the server identifier for a batch
///
/// See [`resolve_identity`].
pub fn resolve_server_id(samples: &[RawSample]) -> String {
    resolve_identity(samples).0.to_string()
}

/// Resolve `(server_id, host)` from the first sample carrying either tag
///
/// A `server_id` that is empty or the `$HOSTNAME` placeholder is replaced by
/// the same sample's `host`. Later samples are not consulted once a sample
/// yields a non-empty value.
pub fn resolve_identity(samples: &[RawSample]) -> (&str, &str) {
    for sample in samples {
        let host = sample.tag_str("host");
        let server_id = match sample.tag_str("server_id") {
            "" | HOSTNAME_PLACEHOLDER => host,
            id => id,
        };
        if !server_id.is_empty() || !host.is_empty() {
            return (server_id, host);
        }
    }
    ("", "")
}

fn snapshot_time(samples: &[RawSample]) -> Option<DateTime<Utc>> {
    // out-of-range timestamps count as absent
    samples
        .iter()
        .filter(|s| s.timestamp > 0.0)
        .find_map(|s| checked_epoch_seconds(s.timestamp))
}
