//! Normalizer scenarios over whole agent batches
//!
//! Mixes fixed end-to-end batches with property tests for the order- and
//! input-dependent policies (disk aggregation, display rank).

use chrono::{TimeZone, Utc};
use fleet_telemetry::config::NormalizerConfig;
use fleet_telemetry::normalize::{resolve_server_id, Normalizer};
use fleet_telemetry::types::{RawBatch, RawSample, SeriesValue};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

const TS: f64 = 1_700_000_000.0;

fn normalizer() -> Normalizer {
    Normalizer::new(NormalizerConfig::default())
}

fn received() -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_800_000_000, 0).unwrap()
}

// =============================================================================
// Identity and time
// =============================================================================

#[test]
fn test_server_id_comes_from_first_tagged_sample() {
    let samples = vec![
        RawSample::new("system", TS),
        RawSample::new("cpu", TS).tag("server_id", "$HOSTNAME").tag("host", "host-a"),
        RawSample::new("disk", TS).tag("server_id", "kiosk-7"),
        RawSample::new("net", TS).tag("server_id", "kiosk-8"),
    ];
    assert_eq!(resolve_server_id(&samples), "host-a");

    let samples = vec![
        RawSample::new("mem", TS).tag("server_id", "$HOSTNAME"),
        RawSample::new("disk", TS).tag("server_id", "kiosk-7").tag("host", "host-b"),
        RawSample::new("net", TS).tag("host", "host-c"),
    ];
    assert_eq!(resolve_server_id(&samples), "kiosk-7");
}

#[test]
fn test_server_id_falls_back_to_host() {
    let samples = vec![
        RawSample::new("cpu", TS).tag("server_id", "$HOSTNAME").tag("host", "host-a"),
        RawSample::new("mem", TS).tag("host", "host-b"),
    ];
    assert_eq!(resolve_server_id(&samples), "host-a");
    assert_eq!(resolve_server_id(&[]), "");
}

#[test]
fn test_every_point_carries_resolved_id() {
    let batch = RawBatch::new(vec![
        RawSample::new("processes", TS).field("total", 10_i64),
        RawSample::new("system", TS)
            .tag("server_id", "kiosk-1")
            .tag("host", "h")
            .field("load1", 0.5),
    ]);
    let out = normalizer().normalize(&batch, received());
    assert!(!out.points.is_empty());
    assert!(out.points.iter().all(|p| p.server_id == "kiosk-1"));
}

#[test]
fn test_snapshot_time_falls_back_to_received_at() {
    let batch = RawBatch::new(vec![RawSample::new("processes", 0.0)
        .tag("host", "h")
        .field("total", 1_i64)]);
    let out = normalizer().normalize(&batch, received());
    assert_eq!(out.snapshot.time, received());
    let total = out.points.iter().find(|p| p.field == "total").unwrap();
    assert_eq!(total.time, received());
}

#[test]
fn test_point_time_without_fallback_uses_raw_timestamp() {
    let config = NormalizerConfig {
        point_time_fallback: false,
        ..NormalizerConfig::default()
    };
    let batch = RawBatch::new(vec![
        RawSample::new("system", TS).tag("host", "h").field("load1", 1.0),
        RawSample::new("processes", 0.0).tag("host", "h").field("total", 3_i64),
    ]);
    let out = Normalizer::new(config).normalize(&batch, received());
    assert_eq!(out.snapshot.time.timestamp(), TS as i64);
    let total = out.points.iter().find(|p| p.measurement == "processes").unwrap();
    assert_eq!(total.time.timestamp(), 0);
}

// =============================================================================
// End-to-end batch
// =============================================================================

#[test]
fn test_kiosk_batch_end_to_end() {
    let batch = RawBatch::new(vec![
        RawSample::new("cpu", TS)
            .tag("cpu", "cpu-total")
            .tag("server_id", "kiosk-1")
            .field("usage_idle", 90.0)
            .field("usage_user", 7.0),
        RawSample::new("cpu", TS).tag("cpu", "cpu0").field("usage_idle", 10.0),
        RawSample::new("mem", TS)
            .field("available_percent", 25.0)
            .field("total", 4_000_i64)
            .field("used", 3_000_i64),
        RawSample::new("kiosk_temperature", TS)
            .tag("city", "BER")
            .field("temp_c", 48.5),
        RawSample::new("kiosk_volume", TS)
            .tag("code", "EU")
            .field("level_percent", 35_i64)
            .field("muted", true),
        RawSample::new("kiosk_power", TS)
            .tag("type", "Battery")
            .field("present", true)
            .field("charge_percent", 87_i64),
        RawSample::new("kiosk_input", TS)
            .tag("name", "touchscreen")
            .field("event_present", false)
            .field("link_present", true),
        RawSample::new("vnstat_daily", TS).field("rx_mib", 3.0),
        RawSample::new("mystery_family", TS).field("x", 1_i64),
    ]);

    let out = normalizer().normalize(&batch, received());
    let snap = &out.snapshot;

    assert_eq!(snap.server_id, "kiosk-1");
    assert!((snap.cpu - 10.0).abs() < 1e-9);
    assert!((snap.memory - 75.0).abs() < 1e-9);
    assert_eq!(snap.memory_used_bytes, 3_000);
    assert_eq!(snap.temperature, Some(48.5));
    assert_eq!(snap.sound_volume_percent, Some(35));
    assert_eq!(snap.sound_muted, Some(true));
    assert_eq!(snap.battery_present, Some(true));
    assert_eq!(snap.city, "BER");
    assert_eq!(snap.region, "EU");
    assert_eq!(snap.net_daily_rx_bytes, Some(3 * 1024 * 1024));
    // event_present wins over link_present
    assert_eq!(snap.input_devices_missing, 1);
    assert_eq!(snap.input_devices[0].identifier, "touchscreen");

    let muted = out
        .points
        .iter()
        .find(|p| p.measurement == "kiosk_volume" && p.field == "muted")
        .unwrap();
    assert_eq!(muted.value, SeriesValue::Int(1));

    let temp = out
        .points
        .iter()
        .find(|p| p.measurement == "environment" && p.field == "temperature_c")
        .unwrap();
    assert_eq!(temp.value, SeriesValue::Double(48.5));

    assert!(out.report.saw_temperature_family);
    assert!(out.report.temperature_captured);
    assert!(!out.report.saw_net_family);
    assert_eq!(out.report.unknown_families, 1);
}

#[test]
fn test_normalize_is_deterministic() {
    let batch = RawBatch::new(vec![
        RawSample::new("sensors", TS)
            .tag("host", "h")
            .field("Core_Temp", 51.0)
            .field("Ambient_temp", 30.0),
        RawSample::new("net", TS)
            .tag("interface", "eth0")
            .field("bytes_sent", 5_i64)
            .field("bytes_recv", 6_i64),
    ]);
    let a = normalizer().normalize(&batch, received());
    let b = normalizer().normalize(&batch, received());
    assert_eq!(a.snapshot, b.snapshot);
    assert_eq!(a.points, b.points);
    // sorted scan: "Ambient_temp" before "Core_Temp"
    assert_eq!(a.snapshot.temperature, Some(30.0));
}

// =============================================================================
// Properties
// =============================================================================

const FSTYPES: [&str; 4] = ["ext4", "xfs", "tmpfs", "overlay"];

#[derive(Debug, Clone)]
struct DiskRow {
    fstype: usize,
    device: u8,
    path: u8,
    total: i64,
    used: i64,
    free: i64,
}

fn disk_row() -> impl Strategy<Value = DiskRow> {
    (0..4usize, 0..3u8, 0..3u8, 0..1_000_000_000_000i64).prop_flat_map(
        |(fstype, device, path, total)| {
            (0..=total, 0..=total).prop_map(move |(used, free)| DiskRow {
                fstype,
                device,
                path,
                total,
                used,
                free,
            })
        },
    )
}

fn display_row() -> impl Strategy<Value = (bool, bool, i64)> {
    (any::<bool>(), any::<bool>(), 640..4000i64)
}

proptest! {
    #[test]
    fn prop_disk_aggregation_matches_reference(rows in prop::collection::vec(disk_row(), 0..12)) {
        let samples: Vec<RawSample> = rows
            .iter()
            .map(|r| {
                RawSample::new("disk", TS)
                    .tag("host", "h")
                    .tag("fstype", FSTYPES[r.fstype])
                    .tag("device", format!("sd{}", r.device))
                    .tag("path", format!("/mnt/{}", r.path))
                    .field("total", r.total)
                    .field("used", r.used)
                    .field("free", r.free)
            })
            .collect();
        let out = normalizer().normalize(&RawBatch::new(samples), received());

        let mut seen = HashSet::new();
        let (mut total, mut used, mut free) = (0i64, 0i64, 0i64);
        for r in &rows {
            if r.fstype >= 2 || !seen.insert((r.device, r.path)) {
                continue;
            }
            total += r.total;
            used += r.used;
            free += r.free;
        }

        let snap = &out.snapshot;
        if total > 0 {
            prop_assert_eq!(snap.disk_total_bytes, total);
            prop_assert_eq!(snap.disk_used_bytes, used);
            prop_assert_eq!(snap.disk_free_bytes, free);
            prop_assert!((snap.disk - used as f64 * 100.0 / total as f64).abs() < 1e-6);
            prop_assert!(snap.disk >= 0.0 && snap.disk <= 100.0);
        } else {
            prop_assert_eq!(snap.disk, 0.0);
            prop_assert_eq!(snap.disk_total_bytes, 0);
            prop_assert_eq!(snap.disk_used_bytes, 0);
            prop_assert_eq!(snap.disk_free_bytes, 0);
        }

        let aggregates: Vec<_> = out
            .points
            .iter()
            .filter(|p| p.measurement == "disk")
            .collect();
        prop_assert_eq!(aggregates.len(), 4);
        for p in aggregates {
            prop_assert_eq!(p.tags.get("aggregated"), Some(&json!(true)));
            prop_assert_eq!(p.time, snap.time);
        }
    }

    #[test]
    fn prop_display_keeps_first_highest_rank(rows in prop::collection::vec(display_row(), 1..8)) {
        let samples: Vec<RawSample> = rows
            .iter()
            .map(|(connected, primary, width)| {
                RawSample::new("kiosk_display", TS)
                    .tag("host", "h")
                    .field("connected", *connected)
                    .field("primary", *primary)
                    .field("width", *width)
            })
            .collect();
        let out = normalizer().normalize(&RawBatch::new(samples), received());

        let rank = |c: bool, p: bool| match (c, p) {
            (true, true) => 3,
            (false, true) => 2,
            (true, false) => 1,
            (false, false) => 0,
        };
        let best = rows.iter().map(|(c, p, _)| rank(*c, *p)).max().unwrap();
        let expected = rows
            .iter()
            .find(|(c, p, _)| rank(*c, *p) == best)
            .unwrap();

        prop_assert_eq!(out.snapshot.display_connected, Some(expected.0));
        prop_assert_eq!(out.snapshot.display_primary, Some(expected.1));
        prop_assert_eq!(out.snapshot.display_width, Some(expected.2));

        // every row emits its own points
        let widths = out
            .points
            .iter()
            .filter(|p| p.measurement == "kiosk_display" && p.field == "width")
            .count();
        prop_assert_eq!(widths, rows.len());
    }
}
