//! Read side of the telemetry store
//!
//! The engine validates raw query-string parameters, turns them into a
//! storage call and shapes the result for the HTTP layer.
//!
//! # Architecture
//!
//! ```text
//! QueryParams (raw strings)
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Validate   │  required ids, durations, tag filter, pagination
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Fetch     │  dyn MetricsStore, limit + 1 rows
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Shape     │  Page<T>, presence → ServerStatus
//! └─────────────┘
//! ```

pub mod duration;
pub mod pagination;

use crate::error::QueryError;
use crate::metrics;
use crate::storage::{MetricsStore, ServerFilter};
use crate::types::{
    CanonicalSnapshot, CityStatusSummary, SeriesMeta, SeriesPointRecord, ServerStatus, TagSet,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

pub use duration::{parse_duration, parse_duration_param};
pub use pagination::{Page, PageInfo, PageRequest, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Default look-back for `range`
pub const DEFAULT_RANGE: &str = "1h";

/// Default online threshold
pub const DEFAULT_THRESHOLD: &str = "5m";

/// Raw query-string parameters shared by every read endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub server_id: Option<String>,
    pub measurement: Option<String>,
    pub field: Option<String>,
    pub tags: Option<String>,
    pub range: Option<String>,
    pub threshold: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

impl QueryParams {
    fn get(value: &Option<String>) -> Option<&str> {
        value.as_deref().filter(|v| !v.is_empty())
    }

    fn page_request(&self) -> Result<PageRequest, QueryError> {
        PageRequest::parse(self.page.as_deref(), self.page_size.as_deref())
    }

    fn server_filter(&self) -> ServerFilter {
        ServerFilter {
            city: Self::get(&self.city).map(str::to_string),
            region: Self::get(&self.region).map(str::to_string),
        }
    }

    fn series_key(&self) -> Result<(&str, &str, &str), QueryError> {
        match (
            Self::get(&self.server_id),
            Self::get(&self.measurement),
            Self::get(&self.field),
        ) {
            (Some(s), Some(m), Some(f)) => Ok((s, m, f)),
            _ => Err(QueryError::MissingParameter("server_id, measurement, field")),
        }
    }

    fn require_server_id(&self) -> Result<&str, QueryError> {
        Self::get(&self.server_id).ok_or(QueryError::MissingParameter("server_id"))
    }
}

/// Parse a tag filter; absent or empty means match everything
pub fn parse_tag_filter(raw: Option<&str>) -> Result<TagSet, QueryError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(TagSet::new()),
        Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            _ => Err(QueryError::InvalidTagFilter),
        },
    }
}

/// Whole seconds carried to storage as an interval
fn whole_seconds(d: Duration) -> i64 {
    d.num_seconds()
}

/// Query engine over a metrics store
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn MetricsStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    /// Distinct `(measurement, field)` pairs recorded for a server
    pub async fn list_series(&self, params: &QueryParams) -> Result<Page<SeriesMeta>, QueryError> {
        let start = Instant::now();
        let server_id = params.require_server_id()?;
        let page = params.page_request()?;

        let rows = self.store.list_series(server_id, page.window()).await?;
        metrics::record_query("list_series", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }

    /// Most recent point for a series
    pub async fn series_latest(&self, params: &QueryParams) -> Result<SeriesPointRecord, QueryError> {
        let start = Instant::now();
        let (server_id, measurement, field) = params.series_key()?;
        let tags = parse_tag_filter(params.tags.as_deref())?;

        let record = self
            .store
            .series_latest(server_id, measurement, field, &tags)
            .await?;
        metrics::record_query("series_latest", start.elapsed().as_secs_f64());
        record.ok_or_else(|| QueryError::NotFound("no data".to_string()))
    }

    /// Points for a series within `range`, oldest first
    pub async fn series_range(
        &self,
        params: &QueryParams,
    ) -> Result<Page<SeriesPointRecord>, QueryError> {
        let start = Instant::now();
        let (server_id, measurement, field) = params.series_key()?;
        let range = parse_duration_param("range", params.range.as_deref(), DEFAULT_RANGE)?;
        let tags = parse_tag_filter(params.tags.as_deref())?;
        let page = params.page_request()?;

        let rows = self
            .store
            .series_range(
                server_id,
                measurement,
                field,
                whole_seconds(range),
                &tags,
                page.window(),
            )
            .await?;
        metrics::record_query("series_range", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }

    /// Known server ids, optionally filtered by city/region
    pub async fn servers(&self, params: &QueryParams) -> Result<Page<String>, QueryError> {
        let start = Instant::now();
        let page = params.page_request()?;

        let rows = self
            .store
            .servers(&params.server_filter(), page.window())
            .await?;
        metrics::record_query("servers", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }

    /// Presence of every server relative to `threshold`
    pub async fn server_status(&self, params: &QueryParams) -> Result<Page<ServerStatus>, QueryError> {
        self.server_status_at(params, Utc::now()).await
    }

    /// [`Self::server_status`] evaluated against a fixed clock
    pub async fn server_status_at(
        &self,
        params: &QueryParams,
        now: DateTime<Utc>,
    ) -> Result<Page<ServerStatus>, QueryError> {
        let start = Instant::now();
        let threshold =
            parse_duration_param("threshold", params.threshold.as_deref(), DEFAULT_THRESHOLD)?;
        let page = params.page_request()?;

        let rows = self
            .store
            .server_presence(&params.server_filter(), page.window())
            .await?;

        let statuses = rows
            .into_iter()
            .map(|p| {
                let age_seconds = (now - p.last_seen).num_seconds();
                ServerStatus {
                    online: Duration::seconds(age_seconds) <= threshold,
                    age_seconds,
                    server_id: p.server_id,
                    last_seen: p.last_seen,
                    city: p.city,
                    city_name: p.city_name,
                    region: p.region,
                    region_name: p.region_name,
                }
            })
            .collect();

        metrics::record_query("server_status", start.elapsed().as_secs_f64());
        Ok(page.finish(statuses))
    }

    /// Online/offline counts per city
    pub async fn city_status(
        &self,
        params: &QueryParams,
    ) -> Result<Page<CityStatusSummary>, QueryError> {
        let start = Instant::now();
        let threshold =
            parse_duration_param("threshold", params.threshold.as_deref(), DEFAULT_THRESHOLD)?;
        let page = params.page_request()?;

        let rows = self
            .store
            .city_status(
                QueryParams::get(&params.region),
                whole_seconds(threshold),
                page.window(),
            )
            .await?;
        metrics::record_query("city_status", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }

    /// Latest snapshot of every server
    pub async fn latest_metrics(
        &self,
        params: &QueryParams,
    ) -> Result<Page<CanonicalSnapshot>, QueryError> {
        let start = Instant::now();
        let page = params.page_request()?;

        let rows = self.store.latest_snapshots(page.window()).await?;
        metrics::record_query("latest_metrics", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }

    /// Snapshots of one server within `range`, oldest first
    pub async fn history_metrics(
        &self,
        params: &QueryParams,
    ) -> Result<Page<CanonicalSnapshot>, QueryError> {
        let start = Instant::now();
        let server_id = params.require_server_id()?;
        let range = parse_duration_param("range", params.range.as_deref(), DEFAULT_RANGE)?;
        let page = params.page_request()?;

        let rows = self
            .store
            .snapshot_history(server_id, whole_seconds(range), page.window())
            .await?;
        metrics::record_query("history_metrics", start.elapsed().as_secs_f64());
        Ok(page.finish(rows))
    }
}
