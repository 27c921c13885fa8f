//! Per-family normalization policies
//!
//! Each family name maps to a handler in a static lookup table. Handlers see
//! the whole batch state so they can apply first-match (capture once),
//! best-rank (display) and aggregate (disk, net) policies.

use super::coerce::{
    as_integer, as_number, boolean_field, extract_temperature, integer_field, mib_to_bytes,
    number_field,
};
use crate::types::{
    CanonicalSnapshot, FieldValue, InputDevice, RawSample, SeriesPoint, SeriesValue, TagSet,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

type FamilyHandler = fn(&mut BatchState, &Sample<'_>);

/// Filesystems that never count toward disk usage
const PSEUDO_FILESYSTEMS: [&str; 17] = [
    "tmpfs",
    "devtmpfs",
    "overlay",
    "squashfs",
    "proc",
    "sysfs",
    "cgroup",
    "cgroup2",
    "nsfs",
    "rpc_pipefs",
    "devpts",
    "securityfs",
    "pstore",
    "hugetlbfs",
    "mqueue",
    "tracefs",
    "fusectl",
];

const CPU_USAGE_FIELDS: [&str; 4] = ["usage_user", "usage_system", "usage_iowait", "usage_steal"];

/// Families with a handler
pub const FAMILY_NAMES: [&str; 20] = [
    "cpu",
    "mem",
    "swap",
    "disk",
    "diskio",
    "system",
    "processes",
    "net",
    "temperature",
    "sensors",
    "kiosk_temperature",
    "kiosk_chassis",
    "kiosk_fan",
    "kiosk_hotspot",
    "kiosk_volume",
    "kiosk_power",
    "kiosk_display",
    "kiosk_input",
    "vnstat_daily",
    "vnstat_monthly",
];

lazy_static! {
    static ref HANDLERS: HashMap<&'static str, FamilyHandler> = {
        let mut m: HashMap<&'static str, FamilyHandler> = HashMap::new();
        m.insert("cpu", cpu);
        m.insert("mem", mem);
        m.insert("swap", swap);
        m.insert("disk", disk);
        m.insert("diskio", diskio);
        m.insert("system", system);
        m.insert("processes", processes);
        m.insert("net", net);
        m.insert("temperature", temperature);
        m.insert("sensors", temperature);
        m.insert("kiosk_temperature", temperature);
        m.insert("kiosk_chassis", kiosk_chassis);
        m.insert("kiosk_fan", kiosk_fan);
        m.insert("kiosk_hotspot", kiosk_hotspot);
        m.insert("kiosk_volume", kiosk_volume);
        m.insert("kiosk_power", kiosk_power);
        m.insert("kiosk_display", kiosk_display);
        m.insert("kiosk_input", kiosk_input);
        m.insert("vnstat_daily", vnstat_daily);
        m.insert("vnstat_monthly", vnstat_monthly);
        m
    };
}

/// Run the handler for a sample's family; false when the family is unknown
pub(super) fn dispatch(state: &mut BatchState, sample: &RawSample, time: DateTime<Utc>) -> bool {
    match HANDLERS.get(sample.name.as_str()) {
        Some(handler) => {
            let ctx = Sample {
                raw: sample,
                time,
                tags: sample.tag_set(),
            };
            handler(state, &ctx);
            true
        }
        None => {
            tracing::debug!(family = %sample.name, "ignoring unknown metric family");
            false
        }
    }
}

/// One sample plus the values shared by every point it emits
pub(super) struct Sample<'a> {
    raw: &'a RawSample,
    time: DateTime<Utc>,
    tags: TagSet,
}

impl Sample<'_> {
    fn fields(&self) -> &std::collections::BTreeMap<String, FieldValue> {
        &self.raw.fields
    }
}

/// Flags reported back to the normalizer
#[derive(Debug, Default, Clone, Copy)]
pub(super) struct FamilyFlags {
    pub saw_temperature: bool,
    pub temperature_captured: bool,
    pub saw_net: bool,
}

#[derive(Debug, Default)]
struct DiskTotals {
    seen: HashSet<String>,
    total: i64,
    used: i64,
    free: i64,
}

/// Mutable state threaded through one batch
pub(super) struct BatchState {
    pub snapshot: CanonicalSnapshot,
    points: Vec<SeriesPoint>,
    flags: FamilyFlags,

    cpu_captured: bool,
    chassis_captured: bool,
    fan_captured: bool,
    hotspot_captured: bool,
    volume_captured: bool,
    battery_captured: bool,
    power_online_captured: bool,
    display_rank: Option<u8>,
    daily_captured: bool,
    monthly_captured: bool,

    disk: DiskTotals,
    net_sent: i64,
    net_recv: i64,
}

impl BatchState {
    pub(super) fn new(snapshot: CanonicalSnapshot) -> Self {
        Self {
            snapshot,
            points: Vec::new(),
            flags: FamilyFlags::default(),
            cpu_captured: false,
            chassis_captured: false,
            fan_captured: false,
            hotspot_captured: false,
            volume_captured: false,
            battery_captured: false,
            power_online_captured: false,
            display_rank: None,
            daily_captured: false,
            monthly_captured: false,
            disk: DiskTotals::default(),
            net_sent: 0,
            net_recv: 0,
        }
    }

    fn push(&mut self, s: &Sample<'_>, measurement: &str, field: &str, value: SeriesValue) {
        self.points.push(SeriesPoint {
            time: s.time,
            server_id: self.snapshot.server_id.clone(),
            measurement: measurement.to_string(),
            field: field.to_string(),
            value,
            tags: s.tags.clone(),
        });
    }

    fn push_aggregate(&mut self, measurement: &str, field: &str, value: SeriesValue) {
        let mut tags = TagSet::new();
        tags.insert("aggregated".to_string(), serde_json::Value::Bool(true));
        self.points.push(SeriesPoint {
            time: self.snapshot.time,
            server_id: self.snapshot.server_id.clone(),
            measurement: measurement.to_string(),
            field: field.to_string(),
            value,
            tags,
        });
    }

    /// Float point from a named field, skipped when absent or not numeric
    fn float_field(&mut self, s: &Sample<'_>, measurement: &str, field: &str) {
        if let Some(v) = number_field(s.fields(), field) {
            self.push(s, measurement, field, SeriesValue::Double(v));
        }
    }

    /// Int point from a named field, skipped when absent or not numeric
    fn int_field(&mut self, s: &Sample<'_>, measurement: &str, field: &str) {
        if let Some(v) = integer_field(s.fields(), field) {
            self.push(s, measurement, field, SeriesValue::Int(v));
        }
    }

    /// One point per coercible field, integer preferred
    fn every_field(&mut self, s: &Sample<'_>, measurement: &str) {
        for (name, raw) in s.fields() {
            let value = match (as_integer_strict(raw), as_number(raw)) {
                (Some(i), _) => SeriesValue::Int(i),
                (None, Some(f)) => SeriesValue::Double(f),
                (None, None) => continue,
            };
            self.push(s, measurement, name, value);
        }
    }

    /// Emit the aggregate points and return the finished output
    pub(super) fn finish(mut self) -> (CanonicalSnapshot, Vec<SeriesPoint>, FamilyFlags) {
        let disk = std::mem::take(&mut self.disk);
        if disk.total > 0 {
            self.snapshot.disk = disk.used as f64 * 100.0 / disk.total as f64;
            self.snapshot.disk_total_bytes = disk.total;
            self.snapshot.disk_used_bytes = disk.used;
            self.snapshot.disk_free_bytes = disk.free;
        }
        let snap = &self.snapshot;
        let (total, used, free, pct) = (
            snap.disk_total_bytes,
            snap.disk_used_bytes,
            snap.disk_free_bytes,
            snap.disk,
        );
        self.push_aggregate("disk", "total", SeriesValue::Int(total));
        self.push_aggregate("disk", "used", SeriesValue::Int(used));
        self.push_aggregate("disk", "free", SeriesValue::Int(free));
        self.push_aggregate("disk", "used_percent", SeriesValue::Double(pct));

        self.snapshot.net_bytes_sent = self.net_sent;
        self.snapshot.net_bytes_recv = self.net_recv;
        if self.net_sent > 0 || self.net_recv > 0 {
            let (sent, recv) = (self.net_sent, self.net_recv);
            self.push_aggregate("net", "bytes_sent_total", SeriesValue::Int(sent));
            self.push_aggregate("net", "bytes_recv_total", SeriesValue::Int(recv));
        }

        (self.snapshot, self.points, self.flags)
    }
}

/// Integer coercion that leaves fractional floats to the float path
fn as_integer_strict(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Float(f) if f.fract() != 0.0 => None,
        FieldValue::Text(t) => t.trim().parse::<i64>().ok(),
        other => as_integer(other),
    }
}

// =============================================================================
// Core host families
// =============================================================================

fn cpu(state: &mut BatchState, s: &Sample<'_>) {
    if s.raw.tag_str("cpu") != "cpu-total" {
        return;
    }
    if !state.cpu_captured {
        if let Some(idle) = number_field(s.fields(), "usage_idle") {
            state.snapshot.cpu = 100.0 - idle;
            state.cpu_captured = true;
        }
    }
    for field in CPU_USAGE_FIELDS {
        state.float_field(s, "cpu", field);
    }
}

fn mem(state: &mut BatchState, s: &Sample<'_>) {
    let fields = s.fields();
    if let Some(available) = number_field(fields, "available_percent") {
        state.snapshot.memory = 100.0 - available;
    }
    if let Some(total) = integer_field(fields, "total") {
        state.snapshot.memory_total_bytes = total;
    }
    if let Some(used) = integer_field(fields, "used") {
        state.snapshot.memory_used_bytes = used;
    }
    state.float_field(s, "mem", "used_percent");
    state.int_field(s, "mem", "total");
    state.int_field(s, "mem", "used");
}

fn swap(state: &mut BatchState, s: &Sample<'_>) {
    state.float_field(s, "swap", "used_percent");
    state.int_field(s, "swap", "in");
    state.int_field(s, "swap", "out");
}

fn disk(state: &mut BatchState, s: &Sample<'_>) {
    if PSEUDO_FILESYSTEMS.contains(&s.raw.tag_str("fstype")) {
        return;
    }
    let key = format!("{}|{}", s.raw.tag_str("device"), s.raw.tag_str("path"));
    if !state.disk.seen.insert(key) {
        return;
    }
    let fields = s.fields();
    // agent values are untrusted; sums saturate instead of wrapping
    let disk = &mut state.disk;
    disk.total = disk.total.saturating_add(integer_field(fields, "total").unwrap_or(0));
    disk.used = disk.used.saturating_add(integer_field(fields, "used").unwrap_or(0));
    disk.free = disk.free.saturating_add(integer_field(fields, "free").unwrap_or(0));
}

fn diskio(state: &mut BatchState, s: &Sample<'_>) {
    state.int_field(s, "diskio", "read_bytes");
    state.int_field(s, "diskio", "write_bytes");
    state.float_field(s, "diskio", "io_util");
    state.float_field(s, "diskio", "io_await");
}

fn system(state: &mut BatchState, s: &Sample<'_>) {
    if let Some(uptime) = integer_field(s.fields(), "uptime") {
        state.snapshot.uptime = uptime;
    }
    state.float_field(s, "system", "load1");
    state.float_field(s, "system", "load5");
    state.float_field(s, "system", "load15");
    state.int_field(s, "system", "uptime");
}

fn processes(state: &mut BatchState, s: &Sample<'_>) {
    for field in ["running", "blocked", "zombies", "total"] {
        state.int_field(s, "processes", field);
    }
}

fn net(state: &mut BatchState, s: &Sample<'_>) {
    state.flags.saw_net = true;
    let iface = s.raw.tag_str("interface");
    if iface.is_empty() || iface.starts_with("lo") {
        return;
    }
    if let Some(sent) = integer_field(s.fields(), "bytes_sent") {
        state.net_sent = state.net_sent.saturating_add(sent);
        state.push(s, "net", "bytes_sent", SeriesValue::Int(sent));
    }
    if let Some(recv) = integer_field(s.fields(), "bytes_recv") {
        state.net_recv = state.net_recv.saturating_add(recv);
        state.push(s, "net", "bytes_recv", SeriesValue::Int(recv));
    }
}

// =============================================================================
// Device families
// =============================================================================

fn temperature(state: &mut BatchState, s: &Sample<'_>) {
    state.flags.saw_temperature = true;
    let Some(value) = extract_temperature(s.fields()) else {
        return;
    };
    if !state.flags.temperature_captured {
        state.snapshot.temperature = Some(value);
        state.flags.temperature_captured = true;
    }
    state.push(s, "environment", "temperature_c", SeriesValue::Double(value));
}

fn kiosk_chassis(state: &mut BatchState, s: &Sample<'_>) {
    if state.chassis_captured {
        return;
    }
    if let Some(temp) = number_field(s.fields(), "temp_c") {
        state.snapshot.chassis_temperature = Some(temp);
        state.chassis_captured = true;
        state.push(s, "kiosk_chassis", "temp_c", SeriesValue::Double(temp));
    }
}

fn kiosk_fan(state: &mut BatchState, s: &Sample<'_>) {
    if state.fan_captured {
        return;
    }
    if let Some(rpm) = integer_field(s.fields(), "rpm") {
        state.snapshot.fan_rpm = Some(rpm);
        state.fan_captured = true;
        state.push(s, "kiosk_fan", "rpm", SeriesValue::Int(rpm));
    }
}

fn kiosk_hotspot(state: &mut BatchState, s: &Sample<'_>) {
    if state.hotspot_captured {
        return;
    }
    if let Some(temp) = number_field(s.fields(), "temp_c") {
        state.snapshot.hotspot_temperature = Some(temp);
        state.hotspot_captured = true;
        state.push(s, "kiosk_hotspot", "temp_c", SeriesValue::Double(temp));
    }
    for field in CPU_USAGE_FIELDS {
        state.float_field(s, "cpu", field);
    }
}

fn kiosk_volume(state: &mut BatchState, s: &Sample<'_>) {
    if state.volume_captured {
        return;
    }
    let Some(level) = integer_field(s.fields(), "level_percent") else {
        return;
    };
    let muted = boolean_field(s.fields(), "muted").unwrap_or(false);
    state.snapshot.sound_volume_percent = Some(level);
    state.snapshot.sound_muted = Some(muted);
    state.volume_captured = true;
    state.push(s, "kiosk_volume", "level_percent", SeriesValue::Int(level));
    state.push(s, "kiosk_volume", "muted", SeriesValue::Int(i64::from(muted)));
}

fn kiosk_power(state: &mut BatchState, s: &Sample<'_>) {
    let fields = s.fields();
    if s.raw.tag_str("type").eq_ignore_ascii_case("battery") {
        if state.battery_captured {
            return;
        }
        let snap = &mut state.snapshot;
        snap.battery_present = boolean_field(fields, "present").or(snap.battery_present);
        snap.battery_charge_percent =
            integer_field(fields, "charge_percent").or(snap.battery_charge_percent);
        snap.battery_voltage_mv = integer_field(fields, "voltage_mv").or(snap.battery_voltage_mv);
        snap.battery_current_ma = integer_field(fields, "current_ma").or(snap.battery_current_ma);
        state.battery_captured = true;
    } else {
        if state.power_online_captured {
            return;
        }
        if let Some(online) = boolean_field(fields, "online") {
            state.snapshot.power_online = Some(online);
            state.power_online_captured = true;
        }
    }
    state.every_field(s, "kiosk_power");
}

/// Display preference: connected and primary beats primary beats connected
fn display_rank(connected: bool, primary: bool) -> u8 {
    match (connected, primary) {
        (true, true) => 3,
        (false, true) => 2,
        (true, false) => 1,
        (false, false) => 0,
    }
}

fn kiosk_display(state: &mut BatchState, s: &Sample<'_>) {
    let fields = s.fields();
    let connected = boolean_field(fields, "connected").unwrap_or(false);
    let primary = boolean_field(fields, "primary").unwrap_or(false);
    let rank = display_rank(connected, primary);

    if state.display_rank.map_or(true, |best| rank > best) {
        let snap = &mut state.snapshot;
        snap.display_connected = Some(connected);
        snap.display_primary = Some(primary);
        snap.display_width = integer_field(fields, "width");
        snap.display_height = integer_field(fields, "height");
        snap.display_refresh_hz = integer_field(fields, "refresh_hz");
        snap.display_dpms_enabled = boolean_field(fields, "dpms_enabled");
        state.display_rank = Some(rank);
    }
    state.every_field(s, "kiosk_display");
}

fn kiosk_input(state: &mut BatchState, s: &Sample<'_>) {
    let raw = s.raw;
    let identifier = ["id", "identifier", "name", "target", "device"]
        .iter()
        .map(|key| raw.tag_str(key))
        .find(|v| !v.trim().is_empty())
        .unwrap_or("");

    let present = ["present", "event_present", "link_present"]
        .iter()
        .find_map(|key| boolean_field(s.fields(), key))
        .unwrap_or(false);

    let snap = &mut state.snapshot;
    if present {
        snap.input_devices_healthy += 1;
    } else {
        snap.input_devices_missing += 1;
    }
    snap.input_devices.push(InputDevice {
        identifier: identifier.to_string(),
        source: raw.tag_str("source").to_string(),
        name: raw.tag_str("name").to_string(),
        vendor: raw.tag_str("vendor").to_string(),
        product: raw.tag_str("product").to_string(),
        bus: raw.tag_str("bus").to_string(),
        device: raw.tag_str("device").to_string(),
        target: raw.tag_str("target").to_string(),
        present,
    });
}

fn vnstat_daily(state: &mut BatchState, s: &Sample<'_>) {
    if state.daily_captured {
        return;
    }
    let (rx, tx) = (mib_to_bytes(s.fields(), "rx_mib"), mib_to_bytes(s.fields(), "tx_mib"));
    if rx.is_none() && tx.is_none() {
        return;
    }
    let snap = &mut state.snapshot;
    snap.net_daily_rx_bytes = rx.or(snap.net_daily_rx_bytes);
    snap.net_daily_tx_bytes = tx.or(snap.net_daily_tx_bytes);
    state.daily_captured = true;
    push_vnstat(state, s, "vnstat_daily", rx, tx);
}

fn vnstat_monthly(state: &mut BatchState, s: &Sample<'_>) {
    if state.monthly_captured {
        return;
    }
    let (rx, tx) = (mib_to_bytes(s.fields(), "rx_mib"), mib_to_bytes(s.fields(), "tx_mib"));
    if rx.is_none() && tx.is_none() {
        return;
    }
    let snap = &mut state.snapshot;
    snap.net_monthly_rx_bytes = rx.or(snap.net_monthly_rx_bytes);
    snap.net_monthly_tx_bytes = tx.or(snap.net_monthly_tx_bytes);
    state.monthly_captured = true;
    push_vnstat(state, s, "vnstat_monthly", rx, tx);
}

fn push_vnstat(
    state: &mut BatchState,
    s: &Sample<'_>,
    measurement: &str,
    rx: Option<i64>,
    tx: Option<i64>,
) {
    if let Some(rx) = rx {
        state.push(s, measurement, "rx_bytes", SeriesValue::Int(rx));
    }
    if let Some(tx) = tx {
        state.push(s, measurement, "tx_bytes", SeriesValue::Int(tx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::epoch_seconds;

    fn run(samples: Vec<RawSample>) -> (CanonicalSnapshot, Vec<SeriesPoint>, FamilyFlags) {
        let snapshot = CanonicalSnapshot {
            server_id: "srv".into(),
            time: epoch_seconds(100.0),
            ..Default::default()
        };
        let mut state = BatchState::new(snapshot);
        for sample in &samples {
            dispatch(&mut state, sample, epoch_seconds(sample.timestamp));
        }
        state.finish()
    }

    fn find<'a>(points: &'a [SeriesPoint], measurement: &str, field: &str) -> Vec<&'a SeriesPoint> {
        points
            .iter()
            .filter(|p| p.measurement == measurement && p.field == field)
            .collect()
    }

    #[test]
    fn test_every_family_has_handler() {
        for name in FAMILY_NAMES {
            assert!(HANDLERS.contains_key(name), "missing handler for {}", name);
        }
        assert_eq!(HANDLERS.len(), FAMILY_NAMES.len());
    }

    #[test]
    fn test_cpu_only_total_rows() {
        let (snap, points, _) = run(vec![
            RawSample::new("cpu", 50.0)
                .tag("cpu", "cpu0")
                .field("usage_idle", 10.0)
                .field("usage_user", 80.0),
            RawSample::new("cpu", 50.0)
                .tag("cpu", "cpu-total")
                .field("usage_idle", 75.0)
                .field("usage_user", 20.0)
                .field("usage_system", 5.0),
        ]);
        assert!((snap.cpu - 25.0).abs() < 1e-9);
        let user = find(&points, "cpu", "usage_user");
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].value, SeriesValue::Double(20.0));
        assert_eq!(find(&points, "cpu", "usage_iowait").len(), 0);
    }

    #[test]
    fn test_disk_aggregation_skips_pseudo_and_duplicates() {
        let (snap, points, _) = run(vec![
            RawSample::new("disk", 50.0)
                .tag("fstype", "ext4")
                .tag("device", "sda1")
                .tag("path", "/")
                .field("total", 1000_i64)
                .field("used", 250_i64)
                .field("free", 750_i64),
            RawSample::new("disk", 50.0)
                .tag("fstype", "ext4")
                .tag("device", "sda1")
                .tag("path", "/")
                .field("total", 1000_i64)
                .field("used", 250_i64)
                .field("free", 750_i64),
            RawSample::new("disk", 50.0)
                .tag("fstype", "tmpfs")
                .tag("device", "tmpfs")
                .tag("path", "/run")
                .field("total", 5000_i64)
                .field("used", 5000_i64),
            RawSample::new("disk", 50.0)
                .tag("fstype", "xfs")
                .tag("device", "sdb1")
                .tag("path", "/data")
                .field("total", 3000_i64)
                .field("used", 750_i64)
                .field("free", 2250_i64),
        ]);
        assert_eq!(snap.disk_total_bytes, 4000);
        assert_eq!(snap.disk_used_bytes, 1000);
        assert_eq!(snap.disk_free_bytes, 3000);
        assert!((snap.disk - 25.0).abs() < 1e-9);

        let agg = find(&points, "disk", "used_percent");
        assert_eq!(agg.len(), 1);
        assert_eq!(agg[0].time, snap.time);
        assert_eq!(agg[0].tags.get("aggregated"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn test_disk_zero_total_leaves_fields_zero() {
        let (snap, points, _) = run(vec![RawSample::new("disk", 50.0)
            .tag("fstype", "ext4")
            .field("used", 10_i64)]);
        assert_eq!(snap.disk, 0.0);
        assert_eq!(snap.disk_used_bytes, 0);
        assert_eq!(find(&points, "disk", "used")[0].value, SeriesValue::Int(0));
    }

    #[test]
    fn test_net_skips_loopback_and_aggregates() {
        let (snap, points, flags) = run(vec![
            RawSample::new("net", 50.0)
                .tag("interface", "lo")
                .field("bytes_sent", 999_i64),
            RawSample::new("net", 50.0)
                .tag("interface", "eth0")
                .field("bytes_sent", 100_i64)
                .field("bytes_recv", 200_i64),
            RawSample::new("net", 50.0)
                .tag("interface", "wlan0")
                .field("bytes_sent", 1_i64),
        ]);
        assert!(flags.saw_net);
        assert_eq!(snap.net_bytes_sent, 101);
        assert_eq!(snap.net_bytes_recv, 200);
        assert_eq!(find(&points, "net", "bytes_sent").len(), 2);
        let total = find(&points, "net", "bytes_sent_total");
        assert_eq!(total[0].value, SeriesValue::Int(101));
    }

    #[test]
    fn test_huge_counters_saturate() {
        let (snap, points, _) = run(vec![
            RawSample::new("disk", 50.0)
                .tag("fstype", "ext4")
                .tag("device", "sda1")
                .field("total", 9.0e18)
                .field("used", i64::MAX - 1)
                .field("free", 9_000_000_000_000_000_000_i64),
            RawSample::new("disk", 50.0)
                .tag("fstype", "ext4")
                .tag("device", "sdb1")
                .field("total", 9.0e18)
                .field("used", i64::MAX - 1)
                .field("free", 9_000_000_000_000_000_000_i64),
            RawSample::new("net", 50.0)
                .tag("interface", "eth0")
                .field("bytes_sent", i64::MAX - 5)
                .field("bytes_recv", i64::MAX - 5),
            RawSample::new("net", 50.0)
                .tag("interface", "eth1")
                .field("bytes_sent", i64::MAX - 5)
                .field("bytes_recv", i64::MAX - 5),
        ]);
        assert_eq!(snap.disk_total_bytes, i64::MAX);
        assert_eq!(snap.disk_used_bytes, i64::MAX);
        assert_eq!(snap.disk_free_bytes, i64::MAX);
        assert!(snap.disk >= 0.0 && snap.disk <= 100.0);
        assert_eq!(snap.net_bytes_sent, i64::MAX);
        assert_eq!(snap.net_bytes_recv, i64::MAX);
        let total = find(&points, "net", "bytes_recv_total");
        assert_eq!(total[0].value, SeriesValue::Int(i64::MAX));
    }

    #[test]
    fn test_net_zero_bytes_emits_no_totals() {
        let (_, points, flags) = run(vec![RawSample::new("net", 50.0).tag("interface", "lo0")]);
        assert!(flags.saw_net);
        assert!(find(&points, "net", "bytes_sent_total").is_empty());
    }

    #[test]
    fn test_system_uptime_point_once() {
        let (snap, points, _) = run(vec![RawSample::new("system", 50.0)
            .field("uptime", 3600_i64)
            .field("load1", 0.25)]);
        assert_eq!(snap.uptime, 3600);
        assert_eq!(find(&points, "system", "uptime").len(), 1);
        assert_eq!(find(&points, "system", "load5").len(), 0);
    }

    #[test]
    fn test_temperature_first_capture_every_point() {
        let (snap, points, flags) = run(vec![
            RawSample::new("sensors", 50.0).field("temp_input", 40.5),
            RawSample::new("temperature", 50.0).field("value", "41"),
        ]);
        assert!(flags.temperature_captured);
        assert_eq!(snap.temperature, Some(40.5));
        assert_eq!(find(&points, "environment", "temperature_c").len(), 2);
    }

    #[test]
    fn test_first_match_families() {
        let (snap, points, _) = run(vec![
            RawSample::new("kiosk_chassis", 50.0).field("temp_c", "warm"),
            RawSample::new("kiosk_chassis", 50.0).field("temp_c", 33.0),
            RawSample::new("kiosk_chassis", 50.0).field("temp_c", 99.0),
            RawSample::new("kiosk_fan", 50.0).field("rpm", 1200.7),
            RawSample::new("kiosk_fan", 50.0).field("rpm", 10_i64),
        ]);
        assert_eq!(snap.chassis_temperature, Some(33.0));
        assert_eq!(snap.fan_rpm, Some(1200));
        assert_eq!(find(&points, "kiosk_chassis", "temp_c").len(), 1);
        assert_eq!(find(&points, "kiosk_fan", "rpm").len(), 1);
    }

    #[test]
    fn test_hotspot_emits_cpu_companions() {
        let (snap, points, _) = run(vec![
            RawSample::new("kiosk_hotspot", 50.0)
                .field("temp_c", 70.0)
                .field("usage_user", 12.5)
                .field("usage_steal", 0.0),
            RawSample::new("kiosk_hotspot", 50.0)
                .field("temp_c", 80.0)
                .field("usage_user", 99.0),
        ]);
        assert_eq!(snap.hotspot_temperature, Some(70.0));
        let user = find(&points, "cpu", "usage_user");
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].value, SeriesValue::Double(12.5));
        assert_eq!(find(&points, "cpu", "usage_steal").len(), 1);
    }

    #[test]
    fn test_volume_muted_point() {
        let (snap, points, _) = run(vec![
            RawSample::new("kiosk_volume", 50.0).field("muted", true),
            RawSample::new("kiosk_volume", 50.0)
                .field("level_percent", "65")
                .field("muted", 1_i64),
        ]);
        assert_eq!(snap.sound_volume_percent, Some(65));
        assert_eq!(snap.sound_muted, Some(true));
        assert_eq!(find(&points, "kiosk_volume", "muted")[0].value, SeriesValue::Int(1));
    }

    #[test]
    fn test_power_battery_and_mains() {
        let (snap, points, _) = run(vec![
            RawSample::new("kiosk_power", 50.0)
                .tag("type", "Battery")
                .field("present", 1_i64)
                .field("charge_percent", 87.0)
                .field("voltage_mv", "12010")
                .field("health", 0.75),
            RawSample::new("kiosk_power", 50.0)
                .tag("type", "battery")
                .field("charge_percent", 10_i64),
            RawSample::new("kiosk_power", 50.0)
                .tag("type", "mains")
                .field("online", true),
        ]);
        assert_eq!(snap.battery_present, Some(true));
        assert_eq!(snap.battery_charge_percent, Some(87));
        assert_eq!(snap.battery_voltage_mv, Some(12010));
        assert_eq!(snap.battery_current_ma, None);
        assert_eq!(snap.power_online, Some(true));

        assert_eq!(find(&points, "kiosk_power", "charge_percent").len(), 1);
        assert_eq!(
            find(&points, "kiosk_power", "health")[0].value,
            SeriesValue::Double(0.75)
        );
        assert_eq!(find(&points, "kiosk_power", "online")[0].value, SeriesValue::Int(1));
    }

    #[test]
    fn test_display_best_rank_wins_ties_keep_first() {
        let row = |connected: i64, primary: i64, width: i64| {
            RawSample::new("kiosk_display", 50.0)
                .field("connected", connected)
                .field("primary", primary)
                .field("width", width)
        };
        let (snap, points, _) = run(vec![row(1, 0, 800), row(1, 1, 1920), row(1, 1, 1280), row(0, 1, 640)]);
        assert_eq!(snap.display_width, Some(1920));
        assert_eq!(snap.display_connected, Some(true));
        assert_eq!(snap.display_primary, Some(true));
        assert_eq!(find(&points, "kiosk_display", "width").len(), 4);
    }

    #[test]
    fn test_input_devices_counted() {
        let (snap, _, _) = run(vec![
            RawSample::new("kiosk_input", 50.0)
                .tag("name", "touchscreen")
                .tag("source", "evdev")
                .field("present", 1_i64),
            RawSample::new("kiosk_input", 50.0)
                .tag("id", " ")
                .tag("target", "/dev/input/event3")
                .field("link_present", 0_i64),
            RawSample::new("kiosk_input", 50.0).tag("device", "usb-1"),
        ]);
        assert_eq!(snap.input_devices_healthy, 1);
        assert_eq!(snap.input_devices_missing, 2);
        assert_eq!(snap.input_devices[0].identifier, "touchscreen");
        assert_eq!(snap.input_devices[1].identifier, "/dev/input/event3");
        assert_eq!(snap.input_devices[2].identifier, "usb-1");
        assert!(!snap.input_devices[2].present);
    }

    #[test]
    fn test_vnstat_capture() {
        let (snap, points, _) = run(vec![
            RawSample::new("vnstat_daily", 50.0).field("note", "none"),
            RawSample::new("vnstat_daily", 50.0).field("rx_mib", 2_i64),
            RawSample::new("vnstat_daily", 50.0).field("rx_mib", 9_i64),
            RawSample::new("vnstat_monthly", 50.0)
                .field("rx_mib", 1.0)
                .field("tx_mib", -4.0),
        ]);
        assert_eq!(snap.net_daily_rx_bytes, Some(2 * 1024 * 1024));
        assert_eq!(snap.net_daily_tx_bytes, None);
        assert_eq!(snap.net_monthly_tx_bytes, Some(0));
        assert_eq!(find(&points, "vnstat_daily", "rx_bytes").len(), 1);
        assert_eq!(find(&points, "vnstat_monthly", "tx_bytes").len(), 1);
    }
}
