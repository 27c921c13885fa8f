//! Query engine paging and rate limiter window properties

use chrono::{Duration, Utc};
use fleet_telemetry::query::{PageRequest, QueryEngine, QueryParams, MAX_PAGE_SIZE};
use fleet_telemetry::security::RateLimiter;
use fleet_telemetry::storage::{InMemoryStore, MetricsStore};
use fleet_telemetry::types::CanonicalSnapshot;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Instant;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn engine_with_servers(count: usize) -> QueryEngine {
    let store = Arc::new(InMemoryStore::new());
    for i in 0..count {
        let snapshot = CanonicalSnapshot {
            server_id: format!("kiosk-{:03}", i),
            time: Utc::now() - Duration::seconds(i as i64),
            city: "BER".to_string(),
            region: "EU".to_string(),
            ..Default::default()
        };
        store.save_snapshot(&snapshot).await.unwrap();
    }
    QueryEngine::new(store)
}

fn page_params(page: i64, page_size: i64) -> QueryParams {
    QueryParams {
        page: Some(page.to_string()),
        page_size: Some(page_size.to_string()),
        ..Default::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A page holds at most `page_size` rows and `has_more` is true exactly
    /// when rows remain past it
    #[test]
    fn prop_server_pages_are_bounded(count in 0usize..60, page in 1i64..8, page_size in 1i64..20) {
        let rt = runtime();
        let result = rt.block_on(async {
            let engine = engine_with_servers(count).await;
            engine.servers(&page_params(page, page_size)).await
        }).unwrap();

        let offset = ((page - 1) * page_size) as usize;
        let expected = count.saturating_sub(offset).min(page_size as usize);
        prop_assert_eq!(result.data.len(), expected);
        prop_assert_eq!(result.pagination.has_more, count > offset + page_size as usize);
        prop_assert_eq!(result.pagination.page, page);
        prop_assert_eq!(result.pagination.page_size, page_size);

        let expected_ids: Vec<String> = (offset..offset + expected)
            .map(|i| format!("kiosk-{:03}", i))
            .collect();
        prop_assert_eq!(result.data, expected_ids);
    }

    /// Oversized page sizes are capped rather than rejected
    #[test]
    fn prop_page_size_is_capped(page_size in 1i64..10_000) {
        let request = PageRequest::new(1, page_size).unwrap();
        prop_assert_eq!(request.page_size(), page_size.min(MAX_PAGE_SIZE));
        prop_assert_eq!(request.window().limit, request.page_size() + 1);
    }

    /// Exactly `max` requests pass per window; the next one is rejected
    #[test]
    fn prop_rate_limit_window(max in 1u32..50) {
        let limiter = RateLimiter::new(max, std::time::Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..max {
            prop_assert!(limiter.allow_at("10.0.0.1", start));
        }
        prop_assert!(!limiter.allow_at("10.0.0.1", start));
        prop_assert!(limiter.allow_at("10.0.0.2", start));
        prop_assert!(limiter.allow_at("10.0.0.1", start + std::time::Duration::from_secs(61)));
        prop_assert_eq!(limiter.stats().rejected, 1);
    }
}

#[tokio::test]
async fn test_pages_cover_every_server_once() {
    let engine = engine_with_servers(23).await;
    let mut seen = Vec::new();
    let mut page = 1;
    loop {
        let result = engine.servers(&page_params(page, 5)).await.unwrap();
        seen.extend(result.data);
        if !result.pagination.has_more {
            break;
        }
        page += 1;
    }
    assert_eq!(page, 5);
    assert_eq!(seen.len(), 23);
    let mut sorted = seen.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted, seen);
}

#[tokio::test]
async fn test_invalid_page_parameters_rejected() {
    let engine = engine_with_servers(3).await;
    for (page, size) in [("0", "10"), ("1", "0"), ("-1", "5"), ("x", "5"), ("1", "1.5")] {
        let params = QueryParams {
            page: Some(page.to_string()),
            page_size: Some(size.to_string()),
            ..Default::default()
        };
        assert!(
            engine.servers(&params).await.is_err(),
            "page={} page_size={} should be rejected",
            page,
            size
        );
    }
}
