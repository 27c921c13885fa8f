//! Core data types for telemetry ingestion and querying
//!
//! # Wire types
//!
//! - [`RawBatch`] / [`RawSample`]: agent payload as decoded from JSON
//! - [`FieldValue`]: dynamically typed field scalar
//!
//! # Normalized types
//!
//! - [`CanonicalSnapshot`]: one row per (server, instant), upserted
//! - [`SeriesPoint`]: one flattened observation, append-only
//!
//! # Query result types
//!
//! - [`SeriesMeta`], [`SeriesPointRecord`], [`ServerStatus`], [`CityStatusSummary`]

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag map attached to series points (JSON object, values may be non-strings)
pub type TagSet = serde_json::Map<String, serde_json::Value>;

// =============================================================================
// Wire Types
// =============================================================================

/// Dynamically typed field value
///
/// Agents report the same logical quantity as float, integer, numeric string,
/// or boolean depending on plugin and version. Values that are none of those
/// (null, arrays, objects) are kept as `Other` and fail every coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag
    Bool(bool),
    /// Integral number
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String, possibly numeric
    Text(String),
    /// Anything else
    Other(serde_json::Value),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// One raw sample reported by an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Measurement family (e.g. "cpu", "disk", "kiosk_display")
    pub name: String,
    /// String tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Dynamically typed fields
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Seconds since epoch
    #[serde(default)]
    pub timestamp: f64,
}

impl RawSample {
    /// Create a sample with no tags or fields
    pub fn new(name: impl Into<String>, timestamp: f64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            ..Default::default()
        }
    }

    /// Builder-style tag setter
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder-style field setter
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Tag value, treating absence as empty
    pub fn tag_str(&self, key: &str) -> &str {
        self.tags.get(key).map(String::as_str).unwrap_or("")
    }

    /// Tags as a JSON object for series points
    pub fn tag_set(&self) -> TagSet {
        self.tags
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect()
    }
}

/// Ingestion payload: `{"metrics": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    /// Samples in agent order
    #[serde(default)]
    pub metrics: Vec<RawSample>,
}

impl RawBatch {
    /// Create a batch from samples
    pub fn new(metrics: Vec<RawSample>) -> Self {
        Self { metrics }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether the batch has no samples
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Convert fractional epoch seconds to a whole-second UTC timestamp
///
/// `None` when the value is not finite or falls outside chrono's range.
pub fn checked_epoch_seconds(ts: f64) -> Option<DateTime<Utc>> {
    if !ts.is_finite() {
        return None;
    }
    // `as` saturates at i64 bounds, which chrono then rejects
    Utc.timestamp_opt(ts.trunc() as i64, 0).single()
}

/// [`checked_epoch_seconds`], with unusable values mapped to the epoch
pub fn epoch_seconds(ts: f64) -> DateTime<Utc> {
    checked_epoch_seconds(ts).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// =============================================================================
// Normalized Types
// =============================================================================

/// Input device health record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDevice {
    /// First non-blank of id, identifier, name, target, device
    pub identifier: String,
    /// Reporting source (e.g. "evdev")
    pub source: String,
    /// Device name
    pub name: String,
    /// Vendor id or name
    pub vendor: String,
    /// Product id or name
    pub product: String,
    /// Bus type
    pub bus: String,
    /// Device node
    pub device: String,
    /// Link target
    pub target: String,
    /// Whether the device is present
    pub present: bool,
}

/// Canonical per-server, per-instant state
///
/// At most one row exists per `(server_id, time)`; re-ingestion overwrites
/// every mutable field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSnapshot {
    /// Server identifier
    pub server_id: String,
    /// Snapshot instant (whole seconds)
    pub time: DateTime<Utc>,

    /// City code
    pub city: String,
    /// City display name
    pub city_name: String,
    /// Region code
    pub region: String,
    /// Region display name
    pub region_name: String,

    /// CPU utilization percent
    pub cpu: f64,
    /// Memory utilization percent
    pub memory: f64,
    /// Total memory bytes
    pub memory_total_bytes: i64,
    /// Used memory bytes
    pub memory_used_bytes: i64,
    /// Aggregate disk utilization percent
    pub disk: f64,
    /// Aggregate disk capacity bytes
    pub disk_total_bytes: i64,
    /// Aggregate disk used bytes
    pub disk_used_bytes: i64,
    /// Aggregate disk free bytes
    pub disk_free_bytes: i64,
    /// Bytes sent summed over non-loopback interfaces
    pub net_bytes_sent: i64,
    /// Bytes received summed over non-loopback interfaces
    pub net_bytes_recv: i64,
    /// Uptime in seconds
    pub uptime: i64,

    /// Environment temperature (°C)
    pub temperature: Option<f64>,
    /// Chassis temperature (°C)
    pub chassis_temperature: Option<f64>,
    /// Hotspot temperature (°C)
    pub hotspot_temperature: Option<f64>,
    /// Fan speed
    pub fan_rpm: Option<i64>,
    /// Sound volume percent
    pub sound_volume_percent: Option<i64>,
    /// Whether sound is muted
    pub sound_muted: Option<bool>,
    /// Battery present
    pub battery_present: Option<bool>,
    /// Battery charge percent
    pub battery_charge_percent: Option<i64>,
    /// Battery voltage (mV)
    pub battery_voltage_mv: Option<i64>,
    /// Battery current (mA)
    pub battery_current_ma: Option<i64>,
    /// Mains power online
    pub power_online: Option<bool>,
    /// Display connected
    pub display_connected: Option<bool>,
    /// Display is primary
    pub display_primary: Option<bool>,
    /// Display width (px)
    pub display_width: Option<i64>,
    /// Display height (px)
    pub display_height: Option<i64>,
    /// Display refresh rate (Hz)
    pub display_refresh_hz: Option<i64>,
    /// Display power management enabled
    pub display_dpms_enabled: Option<bool>,
    /// Daily received bytes (vnstat)
    pub net_daily_rx_bytes: Option<i64>,
    /// Daily transmitted bytes (vnstat)
    pub net_daily_tx_bytes: Option<i64>,
    /// Monthly received bytes (vnstat)
    pub net_monthly_rx_bytes: Option<i64>,
    /// Monthly transmitted bytes (vnstat)
    pub net_monthly_tx_bytes: Option<i64>,

    /// Present input devices
    pub input_devices_healthy: i64,
    /// Missing input devices
    pub input_devices_missing: i64,
    /// Every reported input device
    pub input_devices: Vec<InputDevice>,
}

/// Series point value; exactly one representation is stored
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesValue {
    /// Floating point value (`value_double` column)
    Double(f64),
    /// Integer value (`value_int` column)
    Int(i64),
}

impl SeriesValue {
    /// Value for the `value_double` column
    pub fn as_double(&self) -> Option<f64> {
        match self {
            SeriesValue::Double(v) => Some(*v),
            SeriesValue::Int(_) => None,
        }
    }

    /// Value for the `value_int` column
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SeriesValue::Int(v) => Some(*v),
            SeriesValue::Double(_) => None,
        }
    }
}

/// Flattened time-series observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Observation time
    pub time: DateTime<Utc>,
    /// Server identifier
    pub server_id: String,
    /// Measurement name
    pub measurement: String,
    /// Field name
    pub field: String,
    /// Observed value
    pub value: SeriesValue,
    /// Tags
    pub tags: TagSet,
}

impl fmt::Display for SeriesPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}.{}@{}",
            self.server_id,
            self.measurement,
            self.field,
            self.time.timestamp()
        )
    }
}

// =============================================================================
// Query Result Types
// =============================================================================

/// Distinct (measurement, field) pair recorded for a server
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesMeta {
    /// Measurement name
    pub measurement: String,
    /// Field name
    pub field: String,
}

/// Series point as returned by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPointRecord {
    /// Observation time
    pub time: DateTime<Utc>,
    /// Server identifier
    pub server_id: String,
    /// Measurement name
    pub measurement: String,
    /// Field name
    pub field: String,
    /// Floating point value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_double: Option<f64>,
    /// Integer value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_int: Option<i64>,
    /// Tags
    pub tags: TagSet,
}

impl From<SeriesPoint> for SeriesPointRecord {
    fn from(p: SeriesPoint) -> Self {
        Self {
            time: p.time,
            server_id: p.server_id,
            measurement: p.measurement,
            field: p.field,
            value_double: p.value.as_double(),
            value_int: p.value.as_int(),
            tags: p.tags,
        }
    }
}

/// Presence status for one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// Server identifier
    pub server_id: String,
    /// Time of the most recent snapshot
    pub last_seen: DateTime<Utc>,
    /// Whole seconds since `last_seen`
    pub age_seconds: i64,
    /// `age_seconds <= threshold`
    pub online: bool,
    /// City code
    pub city: String,
    /// City display name
    pub city_name: String,
    /// Region code
    pub region: String,
    /// Region display name
    pub region_name: String,
}

/// Online/offline counts for one city
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CityStatusSummary {
    /// City code (empty when unknown)
    pub city: String,
    /// City display name
    pub city_name: String,
    /// Servers seen within the threshold
    pub online: i64,
    /// Servers not seen within the threshold
    pub offline: i64,
    /// All servers in the city
    pub total: i64,
}
