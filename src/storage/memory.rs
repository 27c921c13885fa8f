//! In-memory storage backend
//!
//! Mirrors the PostgreSQL semantics (snapshot upsert keyed by
//! `(server_id, time)`, append-only points, `@>` tag containment) without
//! durability. Used by tests and by deployments started with
//! `storage.backend = "memory"`.

use super::{tags_contain, MetricsStore, PageWindow, ServerFilter, ServerPresence};
use crate::error::StorageError;
use crate::types::{
    CanonicalSnapshot, CityStatusSummary, SeriesMeta, SeriesPoint, SeriesPointRecord, TagSet,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by (server_id, time) so per-server scans are ordered
    snapshots: BTreeMap<(String, DateTime<Utc>), CanonicalSnapshot>,
    points: Vec<SeriesPoint>,
}

/// Process-local [`MetricsStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_snapshots: AtomicBool,
    fail_points: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make snapshot writes fail (for exercising error paths)
    pub fn set_fail_snapshots(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    /// Make series writes fail (for exercising error paths)
    pub fn set_fail_points(&self, fail: bool) {
        self.fail_points.store(fail, Ordering::SeqCst);
    }

    /// Number of stored snapshots
    pub fn snapshot_count(&self) -> usize {
        self.tables.read().snapshots.len()
    }

    /// Number of stored series points
    pub fn point_count(&self) -> usize {
        self.tables.read().points.len()
    }

    /// Copy of every stored series point in insertion order
    pub fn points(&self) -> Vec<SeriesPoint> {
        self.tables.read().points.clone()
    }

    /// Stored snapshot for an exact key
    pub fn snapshot(&self, server_id: &str, time: DateTime<Utc>) -> Option<CanonicalSnapshot> {
        self.tables
            .read()
            .snapshots
            .get(&(server_id.to_string(), time))
            .cloned()
    }

    /// Newest snapshot per server, ascending by server id
    fn latest_per_server(tables: &Tables) -> Vec<&CanonicalSnapshot> {
        let mut latest: BTreeMap<&str, &CanonicalSnapshot> = BTreeMap::new();
        for ((server_id, _), snap) in &tables.snapshots {
            // keys iterate in time order per server, so the last one wins
            latest.insert(server_id.as_str(), snap);
        }
        latest.into_values().collect()
    }
}

fn cutoff(range_secs: i64) -> DateTime<Utc> {
    Utc::now() - Duration::seconds(range_secs)
}

#[async_trait]
impl MetricsStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save_snapshot(&self, snapshot: &CanonicalSnapshot) -> Result<(), StorageError> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("snapshot writes disabled".into()));
        }
        self.tables.write().snapshots.insert(
            (snapshot.server_id.clone(), snapshot.time),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn save_series_points(&self, points: &[SeriesPoint]) -> Result<(), StorageError> {
        if self.fail_points.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("series writes disabled".into()));
        }
        let mut tables = self.tables.write();
        tables
            .points
            .extend(points.iter().filter(|p| !p.server_id.is_empty()).cloned());
        Ok(())
    }

    async fn list_series(
        &self,
        server_id: &str,
        window: PageWindow,
    ) -> Result<Vec<SeriesMeta>, StorageError> {
        let tables = self.tables.read();
        let distinct: BTreeSet<SeriesMeta> = tables
            .points
            .iter()
            .filter(|p| p.server_id == server_id)
            .map(|p| SeriesMeta {
                measurement: p.measurement.clone(),
                field: p.field.clone(),
            })
            .collect();
        Ok(window.apply(distinct))
    }

    async fn series_latest(
        &self,
        server_id: &str,
        measurement: &str,
        field: &str,
        tags: &TagSet,
    ) -> Result<Option<SeriesPointRecord>, StorageError> {
        let tables = self.tables.read();
        let latest = tables
            .points
            .iter()
            .filter(|p| {
                p.server_id == server_id
                    && p.measurement == measurement
                    && p.field == field
                    && tags_contain(&p.tags, tags)
            })
            // later insertion wins among equal times
            .fold(None::<&SeriesPoint>, |best, p| match best {
                Some(b) if b.time > p.time => Some(b),
                _ => Some(p),
            });
        Ok(latest.cloned().map(Into::into))
    }

    async fn series_range(
        &self,
        server_id: &str,
        measurement: &str,
        field: &str,
        range_secs: i64,
        tags: &TagSet,
        window: PageWindow,
    ) -> Result<Vec<SeriesPointRecord>, StorageError> {
        let since = cutoff(range_secs);
        let tables = self.tables.read();
        let mut matching: Vec<&SeriesPoint> = tables
            .points
            .iter()
            .filter(|p| {
                p.server_id == server_id
                    && p.measurement == measurement
                    && p.field == field
                    && p.time > since
                    && tags_contain(&p.tags, tags)
            })
            .collect();
        matching.sort_by_key(|p| p.time);
        Ok(window
            .apply(matching)
            .into_iter()
            .cloned()
            .map(Into::into)
            .collect())
    }

    async fn servers(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<String>, StorageError> {
        let tables = self.tables.read();
        let ids: BTreeSet<&str> = tables
            .snapshots
            .values()
            .filter(|s| filter.matches(&s.city, &s.region))
            .map(|s| s.server_id.as_str())
            .collect();
        Ok(window.apply(ids.into_iter().map(str::to_string)))
    }

    async fn server_presence(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<ServerPresence>, StorageError> {
        let tables = self.tables.read();
        // filter before picking the latest row, like the SQL WHERE clause
        let mut latest: BTreeMap<&str, &CanonicalSnapshot> = BTreeMap::new();
        for snap in tables
            .snapshots
            .values()
            .filter(|s| filter.matches(&s.city, &s.region))
        {
            latest.insert(snap.server_id.as_str(), snap);
        }
        Ok(window.apply(latest.into_values().map(|s| ServerPresence {
            server_id: s.server_id.clone(),
            last_seen: s.time,
            city: s.city.clone(),
            city_name: s.city_name.clone(),
            region: s.region.clone(),
            region_name: s.region_name.clone(),
        })))
    }

    async fn city_status(
        &self,
        region: Option<&str>,
        threshold_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CityStatusSummary>, StorageError> {
        let now = Utc::now();
        let threshold = Duration::seconds(threshold_secs);
        let tables = self.tables.read();

        let mut latest: BTreeMap<&str, &CanonicalSnapshot> = BTreeMap::new();
        for snap in tables
            .snapshots
            .values()
            .filter(|s| region.map_or(true, |r| s.region == r))
        {
            latest.insert(snap.server_id.as_str(), snap);
        }

        let mut by_city: BTreeMap<String, CityStatusSummary> = BTreeMap::new();
        for snap in latest.values() {
            let entry = by_city
                .entry(snap.city.clone())
                .or_insert_with(|| CityStatusSummary {
                    city: snap.city.clone(),
                    city_name: String::new(),
                    online: 0,
                    offline: 0,
                    total: 0,
                });
            if snap.city_name > entry.city_name {
                entry.city_name = snap.city_name.clone();
            }
            if now - snap.time <= threshold {
                entry.online += 1;
            } else {
                entry.offline += 1;
            }
            entry.total += 1;
        }
        Ok(window.apply(by_city.into_values()))
    }

    async fn latest_snapshots(
        &self,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError> {
        let tables = self.tables.read();
        Ok(window.apply(Self::latest_per_server(&tables).into_iter().cloned()))
    }

    async fn snapshot_history(
        &self,
        server_id: &str,
        range_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError> {
        let since = cutoff(range_secs);
        let tables = self.tables.read();
        let rows = tables
            .snapshots
            .range((server_id.to_string(), since)..)
            .take_while(|((id, _), _)| id == server_id)
            .filter(|((_, time), _)| *time > since)
            .map(|(_, snap)| snap.clone());
        Ok(window.apply(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeriesValue;
    use serde_json::json;

    fn snapshot(server_id: &str, secs_ago: i64, city: &str, region: &str) -> CanonicalSnapshot {
        CanonicalSnapshot {
            server_id: server_id.into(),
            time: Utc::now() - Duration::seconds(secs_ago),
            city: city.into(),
            city_name: format!("{} city", city),
            region: region.into(),
            ..Default::default()
        }
    }

    fn point(server_id: &str, field: &str, secs_ago: i64, tags: serde_json::Value) -> SeriesPoint {
        SeriesPoint {
            time: Utc::now() - Duration::seconds(secs_ago),
            server_id: server_id.into(),
            measurement: "net".into(),
            field: field.into(),
            value: SeriesValue::Int(secs_ago),
            tags: tags.as_object().cloned().unwrap_or_default(),
        }
    }

    const ALL: PageWindow = PageWindow {
        limit: 100,
        offset: 0,
    };

    #[tokio::test]
    async fn test_snapshot_upsert_is_idempotent() {
        let store = InMemoryStore::new();
        let mut snap = snapshot("a", 10, "BER", "EU");
        store.save_snapshot(&snap).await.unwrap();
        snap.cpu = 55.0;
        store.save_snapshot(&snap).await.unwrap();
        store.save_snapshot(&snap).await.unwrap();

        assert_eq!(store.snapshot_count(), 1);
        assert_eq!(store.snapshot("a", snap.time).unwrap().cpu, 55.0);
    }

    #[tokio::test]
    async fn test_points_skip_empty_server_id() {
        let store = InMemoryStore::new();
        store
            .save_series_points(&[point("", "x", 1, json!({})), point("a", "x", 1, json!({}))])
            .await
            .unwrap();
        assert_eq!(store.point_count(), 1);
    }

    #[tokio::test]
    async fn test_series_latest_with_tag_filter() {
        let store = InMemoryStore::new();
        store
            .save_series_points(&[
                point("a", "bytes_sent", 30, json!({"interface": "eth0"})),
                point("a", "bytes_sent", 5, json!({"interface": "wlan0"})),
                point("a", "bytes_sent", 10, json!({"interface": "eth0"})),
            ])
            .await
            .unwrap();

        let mut filter = TagSet::new();
        filter.insert("interface".into(), json!("eth0"));
        let latest = store
            .series_latest("a", "net", "bytes_sent", &filter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.value_int, Some(10));

        let any = store
            .series_latest("a", "net", "bytes_sent", &TagSet::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(any.value_int, Some(5));

        assert!(store
            .series_latest("a", "net", "missing", &TagSet::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_series_range_ascending_within_range() {
        let store = InMemoryStore::new();
        store
            .save_series_points(&[
                point("a", "f", 7200, json!({})),
                point("a", "f", 20, json!({})),
                point("a", "f", 40, json!({})),
            ])
            .await
            .unwrap();
        let rows = store
            .series_range("a", "net", "f", 3600, &TagSet::new(), ALL)
            .await
            .unwrap();
        let ages: Vec<_> = rows.iter().map(|r| r.value_int.unwrap()).collect();
        assert_eq!(ages, vec![40, 20]);
    }

    #[tokio::test]
    async fn test_presence_and_city_status() {
        let store = InMemoryStore::new();
        for snap in [
            snapshot("a", 600, "BER", "EU"),
            snapshot("a", 30, "BER", "EU"),
            snapshot("b", 900, "BER", "EU"),
            snapshot("c", 10, "NYC", "US"),
            snapshot("d", 10, "", "EU"),
        ] {
            store.save_snapshot(&snap).await.unwrap();
        }

        let presence = store
            .server_presence(&ServerFilter::default(), ALL)
            .await
            .unwrap();
        let ids: Vec<_> = presence.iter().map(|p| p.server_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(Utc::now() - presence[0].last_seen < Duration::seconds(60));

        let cities = store.city_status(Some("EU"), 300, ALL).await.unwrap();
        assert_eq!(cities.len(), 2);
        assert_eq!(cities[0].city, "");
        assert_eq!(cities[0].total, 1);
        assert_eq!(cities[1].city, "BER");
        assert_eq!((cities[1].online, cities[1].offline, cities[1].total), (1, 1, 2));
    }

    #[tokio::test]
    async fn test_history_and_latest() {
        let store = InMemoryStore::new();
        for snap in [
            snapshot("a", 7200, "BER", "EU"),
            snapshot("a", 120, "BER", "EU"),
            snapshot("a", 60, "BER", "EU"),
            snapshot("b", 60, "MUC", "EU"),
        ] {
            store.save_snapshot(&snap).await.unwrap();
        }

        let history = store.snapshot_history("a", 3600, ALL).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].time < history[1].time);

        let latest = store.latest_snapshots(ALL).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].server_id, "a");
        assert_eq!(latest[0].time, history[1].time);

        let servers = store
            .servers(
                &ServerFilter {
                    city: Some("MUC".into()),
                    region: None,
                },
                ALL,
            )
            .await
            .unwrap();
        assert_eq!(servers, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = InMemoryStore::new();
        store.set_fail_points(true);
        assert!(store
            .save_series_points(&[point("a", "f", 1, json!({}))])
            .await
            .is_err());
        store.set_fail_snapshots(true);
        assert!(store.save_snapshot(&snapshot("a", 1, "", "")).await.is_err());
    }
}
