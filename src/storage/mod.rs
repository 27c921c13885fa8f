//! Persistence for snapshots and series points
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────────┐
//!  ingestion ─►│  dyn MetricsStore    │◄─ query engine
//!              └──────────┬───────────┘
//!                ┌────────┴────────┐
//!            PgStore          InMemoryStore
//!       (server_metrics,      (tests, no-db
//!        metric_points)        deployments)
//! ```
//!
//! All list reads take a [`PageWindow`]; callers ask for one row more than
//! they intend to return and use the extra row to derive `has_more`.

pub mod memory;
pub mod postgres;

use crate::error::StorageError;
use crate::types::{
    CanonicalSnapshot, CityStatusSummary, SeriesMeta, SeriesPoint, SeriesPointRecord, TagSet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::InMemoryStore;
pub use postgres::{schema_statements, PgStore};

/// Row window for a paged read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Maximum rows to return
    pub limit: i64,
    /// Rows to skip
    pub offset: i64,
}

impl PageWindow {
    /// Apply the window to an already ordered iterator
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset.max(0) as usize)
            .take(self.limit.max(0) as usize)
            .collect()
    }
}

/// Optional geo filter for server listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFilter {
    /// Exact city code
    pub city: Option<String>,
    /// Exact region code
    pub region: Option<String>,
}

impl ServerFilter {
    /// Whether a snapshot passes the filter
    pub fn matches(&self, city: &str, region: &str) -> bool {
        self.city.as_deref().map_or(true, |c| c == city)
            && self.region.as_deref().map_or(true, |r| r == region)
    }
}

/// Latest-seen record for one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerPresence {
    /// Server identifier
    pub server_id: String,
    /// Time of the newest snapshot
    pub last_seen: DateTime<Utc>,
    /// City code
    pub city: String,
    /// City display name
    pub city_name: String,
    /// Region code
    pub region: String,
    /// Region display name
    pub region_name: String,
}

/// Storage backend for snapshots and series points
#[async_trait]
pub trait MetricsStore: Send + Sync + 'static {
    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    /// Create tables and indexes if missing
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    /// Cheap connectivity check
    async fn health_check(&self) -> Result<(), StorageError>;

    /// Upsert a snapshot keyed by `(server_id, time)`
    async fn save_snapshot(&self, snapshot: &CanonicalSnapshot) -> Result<(), StorageError>;

    /// Append series points in one transaction
    ///
    /// Points with an empty `server_id` are skipped.
    async fn save_series_points(&self, points: &[SeriesPoint]) -> Result<(), StorageError>;

    /// Distinct `(measurement, field)` pairs for a server, lexicographic
    async fn list_series(
        &self,
        server_id: &str,
        window: PageWindow,
    ) -> Result<Vec<SeriesMeta>, StorageError>;

    /// Newest point whose tags contain `tags`
    async fn series_latest(
        &self,
        server_id: &str,
        measurement: &str,
        field: &str,
        tags: &TagSet,
    ) -> Result<Option<SeriesPointRecord>, StorageError>;

    /// Points newer than `now - range_secs` whose tags contain `tags`, oldest first
    async fn series_range(
        &self,
        server_id: &str,
        measurement: &str,
        field: &str,
        range_secs: i64,
        tags: &TagSet,
        window: PageWindow,
    ) -> Result<Vec<SeriesPointRecord>, StorageError>;

    /// Distinct server ids with at least one matching snapshot, ascending
    async fn servers(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<String>, StorageError>;

    /// Latest snapshot identity per server, ascending by server id
    async fn server_presence(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<ServerPresence>, StorageError>;

    /// Online/offline counts per city from each server's latest snapshot
    async fn city_status(
        &self,
        region: Option<&str>,
        threshold_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CityStatusSummary>, StorageError>;

    /// Latest snapshot per server, ascending by server id
    async fn latest_snapshots(
        &self,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError>;

    /// Snapshots for one server newer than `now - range_secs`, oldest first
    async fn snapshot_history(
        &self,
        server_id: &str,
        range_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError>;
}

/// JSON containment with `@>` semantics
///
/// Objects contain every key of the filter with a contained value; arrays
/// contain every filter element; scalars compare by equality.
pub fn json_contains(haystack: &serde_json::Value, needle: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (haystack, needle) {
        (Value::Object(h), Value::Object(n)) => n
            .iter()
            .all(|(k, nv)| h.get(k).is_some_and(|hv| json_contains(hv, nv))),
        (Value::Array(h), Value::Array(n)) => n
            .iter()
            .all(|nv| h.iter().any(|hv| json_contains(hv, nv))),
        (h, n) => h == n,
    }
}

/// Tag containment for tag sets
pub fn tags_contain(tags: &TagSet, filter: &TagSet) -> bool {
    filter
        .iter()
        .all(|(k, nv)| tags.get(k).is_some_and(|hv| json_contains(hv, nv)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_window_apply() {
        let window = PageWindow { limit: 3, offset: 2 };
        assert_eq!(window.apply(1..=10), vec![3, 4, 5]);
        assert!(PageWindow { limit: 3, offset: 20 }.apply(1..=10).is_empty());
    }

    #[test]
    fn test_server_filter() {
        let filter = ServerFilter {
            city: Some("BER".into()),
            region: None,
        };
        assert!(filter.matches("BER", "EU"));
        assert!(!filter.matches("MUC", "EU"));
        assert!(ServerFilter::default().matches("", ""));
    }

    #[test]
    fn test_json_contains() {
        let tags = json!({"cpu": "cpu-total", "host": "k1", "aggregated": true});
        assert!(json_contains(&tags, &json!({})));
        assert!(json_contains(&tags, &json!({"aggregated": true})));
        assert!(!json_contains(&tags, &json!({"aggregated": "true"})));
        assert!(!json_contains(&tags, &json!({"missing": 1})));
        assert!(json_contains(&json!([1, 2, 3]), &json!([3, 1])));
    }

    #[test]
    fn test_tags_contain() {
        let mut tags = TagSet::new();
        tags.insert("interface".into(), json!("eth0"));
        let mut filter = TagSet::new();
        assert!(tags_contain(&tags, &filter));
        filter.insert("interface".into(), json!("eth1"));
        assert!(!tags_contain(&tags, &filter));
    }
}
