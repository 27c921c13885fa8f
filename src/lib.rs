//! Fleet Telemetry - ingestion and query backend for agent-reported metrics
//!
//! This library provides:
//! - A pure normalizer from heterogeneous agent batches to one canonical
//!   snapshot per host and instant plus a flattened series stream
//! - Batched, bounded-queue persistence of series points
//! - Paginated, tag-filtered queries with derived online status
//! - A per-client fixed-window rate limiter for the HTTP surface

#![warn(clippy::all)]

pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Per-client rate limiting
pub mod security;

/// Batch normalization into snapshots and series points
pub mod normalize;

/// Snapshot persistence and batched series writes
pub mod ingestion;

/// Parameter validation and result shaping for read endpoints
pub mod query;

/// axum router, handlers and error mapping
pub mod api;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use normalize::Normalizer;
pub use storage::{InMemoryStore, MetricsStore, PgStore};
pub use types::{CanonicalSnapshot, RawBatch, RawSample, SeriesPoint};
