//! PostgreSQL storage backend
//!
//! Two tables:
//!
//! - `server_metrics`: wide snapshot table, `UNIQUE (server_id, time)`,
//!   written with `INSERT .. ON CONFLICT DO UPDATE`
//! - `metric_points`: append-only series table with a JSONB tag column
//!
//! When the `timescaledb` extension is available both tables are turned into
//! hypertables on a best-effort basis.

use super::{MetricsStore, PageWindow, ServerFilter, ServerPresence};
use crate::config::DatabaseConfig;
use crate::error::StorageError;
use crate::types::{
    CanonicalSnapshot, CityStatusSummary, InputDevice, SeriesMeta, SeriesPoint,
    SeriesPointRecord, TagSet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{info, warn};

/// Rows per INSERT statement (7 binds each, well under the 65535 bind limit)
const INSERT_CHUNK_ROWS: usize = 1000;

/// Snapshot columns in bind order
const SNAPSHOT_COLUMNS: [&str; 41] = [
    "time",
    "server_id",
    "city",
    "city_name",
    "region",
    "region_name",
    "cpu",
    "memory",
    "memory_total_bytes",
    "memory_used_bytes",
    "disk",
    "disk_total_bytes",
    "disk_used_bytes",
    "disk_free_bytes",
    "net_bytes_sent",
    "net_bytes_recv",
    "uptime",
    "temperature",
    "chassis_temperature",
    "hotspot_temperature",
    "fan_rpm",
    "sound_volume_percent",
    "sound_muted",
    "battery_present",
    "battery_charge_percent",
    "battery_voltage_mv",
    "battery_current_ma",
    "power_online",
    "display_connected",
    "display_primary",
    "display_width",
    "display_height",
    "display_refresh_hz",
    "display_dpms_enabled",
    "net_daily_rx_bytes",
    "net_daily_tx_bytes",
    "net_monthly_rx_bytes",
    "net_monthly_tx_bytes",
    "input_devices_healthy",
    "input_devices_missing",
    "input_devices",
];

const POINT_COLUMNS: &str = "time, server_id, measurement, field, value_double, value_int, tags";

const SCHEMA: [&str; 7] = [
    r#"CREATE TABLE IF NOT EXISTS server_metrics (
    time TIMESTAMPTZ NOT NULL,
    server_id TEXT NOT NULL,
    city TEXT NOT NULL DEFAULT '',
    city_name TEXT NOT NULL DEFAULT '',
    region TEXT NOT NULL DEFAULT '',
    region_name TEXT NOT NULL DEFAULT '',
    cpu DOUBLE PRECISION NOT NULL DEFAULT 0,
    memory DOUBLE PRECISION NOT NULL DEFAULT 0,
    memory_total_bytes BIGINT NOT NULL DEFAULT 0,
    memory_used_bytes BIGINT NOT NULL DEFAULT 0,
    disk DOUBLE PRECISION NOT NULL DEFAULT 0,
    disk_total_bytes BIGINT NOT NULL DEFAULT 0,
    disk_used_bytes BIGINT NOT NULL DEFAULT 0,
    disk_free_bytes BIGINT NOT NULL DEFAULT 0,
    net_bytes_sent BIGINT NOT NULL DEFAULT 0,
    net_bytes_recv BIGINT NOT NULL DEFAULT 0,
    uptime BIGINT NOT NULL DEFAULT 0,
    temperature DOUBLE PRECISION NULL,
    chassis_temperature DOUBLE PRECISION NULL,
    hotspot_temperature DOUBLE PRECISION NULL,
    fan_rpm BIGINT NULL,
    sound_volume_percent BIGINT NULL,
    sound_muted BOOLEAN NULL,
    battery_present BOOLEAN NULL,
    battery_charge_percent BIGINT NULL,
    battery_voltage_mv BIGINT NULL,
    battery_current_ma BIGINT NULL,
    power_online BOOLEAN NULL,
    display_connected BOOLEAN NULL,
    display_primary BOOLEAN NULL,
    display_width BIGINT NULL,
    display_height BIGINT NULL,
    display_refresh_hz BIGINT NULL,
    display_dpms_enabled BOOLEAN NULL,
    net_daily_rx_bytes BIGINT NULL,
    net_daily_tx_bytes BIGINT NULL,
    net_monthly_rx_bytes BIGINT NULL,
    net_monthly_tx_bytes BIGINT NULL,
    input_devices_healthy BIGINT NOT NULL DEFAULT 0,
    input_devices_missing BIGINT NOT NULL DEFAULT 0,
    input_devices JSONB NOT NULL DEFAULT '[]'::jsonb,
    UNIQUE (server_id, time)
)"#,
    "CREATE INDEX IF NOT EXISTS idx_server_metrics_server_id_time_desc ON server_metrics (server_id, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_server_metrics_time ON server_metrics (time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_server_metrics_region_server_id_time_desc ON server_metrics (region, server_id, time DESC)",
    r#"CREATE TABLE IF NOT EXISTS metric_points (
    time TIMESTAMPTZ NOT NULL,
    server_id TEXT NOT NULL,
    measurement TEXT NOT NULL,
    field TEXT NOT NULL,
    value_double DOUBLE PRECISION NULL,
    value_int BIGINT NULL,
    tags JSONB NOT NULL DEFAULT '{}'::jsonb
)"#,
    "CREATE INDEX IF NOT EXISTS idx_metric_points_series_time_desc ON metric_points (server_id, measurement, field, time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metric_points_tags ON metric_points USING GIN (tags)",
];

const HYPERTABLES: [&str; 3] = [
    "CREATE EXTENSION IF NOT EXISTS timescaledb",
    "SELECT create_hypertable('server_metrics', 'time', if_not_exists => TRUE, migrate_data => TRUE)",
    "SELECT create_hypertable('metric_points', 'time', if_not_exists => TRUE, migrate_data => TRUE)",
];

lazy_static! {
    static ref UPSERT_SNAPSHOT_SQL: String = {
        let placeholders: Vec<String> = (1..=SNAPSHOT_COLUMNS.len())
            .map(|i| format!("${}", i))
            .collect();
        let updates: Vec<String> = SNAPSHOT_COLUMNS
            .iter()
            .filter(|c| !matches!(**c, "time" | "server_id"))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        format!(
            "INSERT INTO server_metrics ({}) VALUES ({}) ON CONFLICT (server_id, time) DO UPDATE SET {}",
            SNAPSHOT_COLUMNS.join(", "),
            placeholders.join(", "),
            updates.join(", ")
        )
    };
    static ref SNAPSHOT_SELECT: String = SNAPSHOT_COLUMNS.join(", ");
}

/// DDL statements for the schema, in execution order
pub fn schema_statements() -> Vec<&'static str> {
    SCHEMA.iter().chain(HYPERTABLES.iter()).copied().collect()
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    time: DateTime<Utc>,
    server_id: String,
    city: String,
    city_name: String,
    region: String,
    region_name: String,
    cpu: f64,
    memory: f64,
    memory_total_bytes: i64,
    memory_used_bytes: i64,
    disk: f64,
    disk_total_bytes: i64,
    disk_used_bytes: i64,
    disk_free_bytes: i64,
    net_bytes_sent: i64,
    net_bytes_recv: i64,
    uptime: i64,
    temperature: Option<f64>,
    chassis_temperature: Option<f64>,
    hotspot_temperature: Option<f64>,
    fan_rpm: Option<i64>,
    sound_volume_percent: Option<i64>,
    sound_muted: Option<bool>,
    battery_present: Option<bool>,
    battery_charge_percent: Option<i64>,
    battery_voltage_mv: Option<i64>,
    battery_current_ma: Option<i64>,
    power_online: Option<bool>,
    display_connected: Option<bool>,
    display_primary: Option<bool>,
    display_width: Option<i64>,
    display_height: Option<i64>,
    display_refresh_hz: Option<i64>,
    display_dpms_enabled: Option<bool>,
    net_daily_rx_bytes: Option<i64>,
    net_daily_tx_bytes: Option<i64>,
    net_monthly_rx_bytes: Option<i64>,
    net_monthly_tx_bytes: Option<i64>,
    input_devices_healthy: i64,
    input_devices_missing: i64,
    input_devices: Json<Vec<InputDevice>>,
}

impl From<SnapshotRow> for CanonicalSnapshot {
    fn from(r: SnapshotRow) -> Self {
        Self {
            server_id: r.server_id,
            time: r.time,
            city: r.city,
            city_name: r.city_name,
            region: r.region,
            region_name: r.region_name,
            cpu: r.cpu,
            memory: r.memory,
            memory_total_bytes: r.memory_total_bytes,
            memory_used_bytes: r.memory_used_bytes,
            disk: r.disk,
            disk_total_bytes: r.disk_total_bytes,
            disk_used_bytes: r.disk_used_bytes,
            disk_free_bytes: r.disk_free_bytes,
            net_bytes_sent: r.net_bytes_sent,
            net_bytes_recv: r.net_bytes_recv,
            uptime: r.uptime,
            temperature: r.temperature,
            chassis_temperature: r.chassis_temperature,
            hotspot_temperature: r.hotspot_temperature,
            fan_rpm: r.fan_rpm,
            sound_volume_percent: r.sound_volume_percent,
            sound_muted: r.sound_muted,
            battery_present: r.battery_present,
            battery_charge_percent: r.battery_charge_percent,
            battery_voltage_mv: r.battery_voltage_mv,
            battery_current_ma: r.battery_current_ma,
            power_online: r.power_online,
            display_connected: r.display_connected,
            display_primary: r.display_primary,
            display_width: r.display_width,
            display_height: r.display_height,
            display_refresh_hz: r.display_refresh_hz,
            display_dpms_enabled: r.display_dpms_enabled,
            net_daily_rx_bytes: r.net_daily_rx_bytes,
            net_daily_tx_bytes: r.net_daily_tx_bytes,
            net_monthly_rx_bytes: r.net_monthly_rx_bytes,
            net_monthly_tx_bytes: r.net_monthly_tx_bytes,
            input_devices_healthy: r.input_devices_healthy,
            input_devices_missing: r.input_devices_missing,
            input_devices: r.input_devices.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PointRow {
    time: DateTime<Utc>,
    server_id: String,
    measurement: String,
    field: String,
    value_double: Option<f64>,
    value_int: Option<i64>,
    tags: Json<TagSet>,
}

impl From<PointRow> for SeriesPointRecord {
    fn from(r: PointRow) -> Self {
        Self {
            time: r.time,
            server_id: r.server_id,
            measurement: r.measurement,
            field: r.field,
            value_double: r.value_double,
            value_int: r.value_int,
            tags: r.tags.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PresenceRow {
    server_id: String,
    time: DateTime<Utc>,
    city: String,
    city_name: String,
    region: String,
    region_name: String,
}

/// PostgreSQL-backed [`MetricsStore`]
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool using the database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.connection_url())
            .await?;

        info!(
            host = %config.host,
            database = %config.name,
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn try_enable_timescale(&self) {
        let available: Result<bool, sqlx::Error> = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pg_available_extensions WHERE name = 'timescaledb')",
        )
        .fetch_one(&self.pool)
        .await;

        match available {
            Ok(true) => {
                for stmt in HYPERTABLES {
                    if let Err(e) = sqlx::query(stmt).execute(&self.pool).await {
                        warn!(error = %e, statement = stmt, "TimescaleDB setup step failed");
                        return;
                    }
                }
                info!("TimescaleDB hypertables enabled");
            }
            Ok(false) => info!("TimescaleDB not available, using plain tables"),
            Err(e) => warn!(error = %e, "Could not probe for TimescaleDB"),
        }
    }
}

fn push_server_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &ServerFilter) {
    let mut sep = " WHERE ";
    if let Some(city) = &filter.city {
        qb.push(sep).push("city = ").push_bind(city.clone());
        sep = " AND ";
    }
    if let Some(region) = &filter.region {
        qb.push(sep).push("region = ").push_bind(region.clone());
    }
}

fn push_window(qb: &mut QueryBuilder<'_, Postgres>, window: PageWindow) {
    qb.push(" LIMIT ");
    qb.push_bind(window.limit);
    qb.push(" OFFSET ");
    qb.push_bind(window.offset);
}

#[async_trait]
impl MetricsStore for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        self.try_enable_timescale().await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn save_snapshot(&self, s: &CanonicalSnapshot) -> Result<(), StorageError> {
        sqlx::query(UPSERT_SNAPSHOT_SQL.as_str())
            .bind(s.time)
            .bind(&s.server_id)
            .bind(&s.city)
            .bind(&s.city_name)
            .bind(&s.region)
            .bind(&s.region_name)
            .bind(s.cpu)
            .bind(s.memory)
            .bind(s.memory_total_bytes)
            .bind(s.memory_used_bytes)
            .bind(s.disk)
            .bind(s.disk_total_bytes)
            .bind(s.disk_used_bytes)
            .bind(s.disk_free_bytes)
            .bind(s.net_bytes_sent)
            .bind(s.net_bytes_recv)
            .bind(s.uptime)
            .bind(s.temperature)
            .bind(s.chassis_temperature)
            .bind(s.hotspot_temperature)
            .bind(s.fan_rpm)
            .bind(s.sound_volume_percent)
            .bind(s.sound_muted)
            .bind(s.battery_present)
            .bind(s.battery_charge_percent)
            .bind(s.battery_voltage_mv)
            .bind(s.battery_current_ma)
            .bind(s.power_online)
            .bind(s.display_connected)
            .bind(s.display_primary)
            .bind(s.display_width)
            .bind(s.display_height)
            .bind(s.display_refresh_hz)
            .bind(s.display_dpms_enabled)
            .bind(s.net_daily_rx_bytes)
            .bind(s.net_daily_tx_bytes)
            .bind(s.net_monthly_rx_bytes)
            .bind(s.net_monthly_tx_bytes)
            .bind(s.input_devices_healthy)
            .bind(s.input_devices_missing)
            .bind(Json(&s.input_devices))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_series_points(&self, points: &[SeriesPoint]) -> Result<(), StorageError> {
        let rows: Vec<&SeriesPoint> = points.iter().filter(|p| !p.server_id.is_empty()).collect();
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new(format!("INSERT INTO metric_points ({}) ", POINT_COLUMNS));
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(p.time)
                    .push_bind(p.server_id.clone())
                    .push_bind(p.measurement.clone())
                    .push_bind(p.field.clone())
                    .push_bind(p.value.as_double())
                    .push_bind(p.value.as_int())
                    .push_bind(Json(p.tags.clone()));
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_series(
        &self,
        server_id: &str,
        window: PageWindow,
    ) -> Result<Vec<SeriesMeta>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT measurement, field FROM metric_points \
             WHERE server_id = $1 ORDER BY measurement, field LIMIT $2 OFFSET $3",
        )
        .bind(server_id)
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(measurement, field)| SeriesMeta { measurement, field })
            .collect())
    }

    async fn series_latest(
        &self,
        server_id: &str,
        measurement: &str,
        field: &str,
        tags: &TagSet,
    ) -> Result<Option<SeriesPointRecord>, StorageError> {
        let row: Option<PointRow> = sqlx::query_as(&format!(
            "SELECT {} FROM metric_points \
             WHERE server_id = $1 AND measurement = $2 AND field = $3 AND tags @> $4 \
             ORDER BY time DESC LIMIT 1",
            POINT_COLUMNS
        ))
        .bind(server_id)
        .bind(measurement)
        .bind(field)
        .bind(Json(tags))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
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
        let rows: Vec<PointRow> = sqlx::query_as(&format!(
            "SELECT {} FROM metric_points \
             WHERE server_id = $1 AND measurement = $2 AND field = $3 \
               AND time > now() - ($4::bigint * INTERVAL '1 second') AND tags @> $5 \
             ORDER BY time LIMIT $6 OFFSET $7",
            POINT_COLUMNS
        ))
        .bind(server_id)
        .bind(measurement)
        .bind(field)
        .bind(range_secs)
        .bind(Json(tags))
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn servers(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<String>, StorageError> {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT DISTINCT server_id FROM server_metrics");
        push_server_filter(&mut qb, filter);
        qb.push(" ORDER BY server_id");
        push_window(&mut qb, window);

        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn server_presence(
        &self,
        filter: &ServerFilter,
        window: PageWindow,
    ) -> Result<Vec<ServerPresence>, StorageError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "SELECT DISTINCT ON (server_id) server_id, time, city, city_name, region, region_name \
             FROM server_metrics",
        );
        push_server_filter(&mut qb, filter);
        qb.push(" ORDER BY server_id, time DESC");
        push_window(&mut qb, window);

        let rows: Vec<PresenceRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| ServerPresence {
                server_id: r.server_id,
                last_seen: r.time,
                city: r.city,
                city_name: r.city_name,
                region: r.region,
                region_name: r.region_name,
            })
            .collect())
    }

    async fn city_status(
        &self,
        region: Option<&str>,
        threshold_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CityStatusSummary>, StorageError> {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "WITH latest AS (SELECT DISTINCT ON (server_id) server_id, time, city, city_name \
             FROM server_metrics",
        );
        if let Some(region) = region {
            qb.push(" WHERE region = ");
            qb.push_bind(region.to_string());
        }
        qb.push(" ORDER BY server_id, time DESC) SELECT COALESCE(city, '') AS city, ");
        qb.push("MAX(COALESCE(city_name, '')) AS city_name, ");
        qb.push("SUM(CASE WHEN now() - time <= (");
        qb.push_bind(threshold_secs);
        qb.push("::bigint * INTERVAL '1 second') THEN 1 ELSE 0 END)::bigint AS online, ");
        qb.push("SUM(CASE WHEN now() - time > (");
        qb.push_bind(threshold_secs);
        qb.push("::bigint * INTERVAL '1 second') THEN 1 ELSE 0 END)::bigint AS offline, ");
        qb.push("COUNT(*) AS total FROM latest GROUP BY 1 ORDER BY 1");
        push_window(&mut qb, window);

        let rows: Vec<(String, String, i64, i64, i64)> =
            qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(city, city_name, online, offline, total)| CityStatusSummary {
                city,
                city_name,
                online,
                offline,
                total,
            })
            .collect())
    }

    async fn latest_snapshots(
        &self,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT DISTINCT ON (server_id) {} FROM server_metrics \
             ORDER BY server_id, time DESC LIMIT $1 OFFSET $2",
            SNAPSHOT_SELECT.as_str()
        ))
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn snapshot_history(
        &self,
        server_id: &str,
        range_secs: i64,
        window: PageWindow,
    ) -> Result<Vec<CanonicalSnapshot>, StorageError> {
        let rows: Vec<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {} FROM server_metrics \
             WHERE server_id = $1 AND time > now() - ($2::bigint * INTERVAL '1 second') \
             ORDER BY time LIMIT $3 OFFSET $4",
            SNAPSHOT_SELECT.as_str()
        ))
        .bind(server_id)
        .bind(range_secs)
        .bind(window.limit)
        .bind(window.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
