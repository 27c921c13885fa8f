//! HTTP surface
//!
//! # Endpoints
//!
//! - `GET /` - liveness
//! - `GET /health` - storage health, writer and limiter counters
//! - `GET /metrics` - Prometheus metrics
//! - `POST /api/metrics` - ingest an agent batch
//! - `GET /api/metrics/latest`, `GET /api/metrics/history` - snapshots
//! - `GET /api/servers`, `/api/servers/status`, `/api/servers/status/city` - presence
//! - `GET /api/series`, `/api/series/latest`, `/api/series/query` - raw series
//!
//! Every `/api` route passes through the per-client rate limiter.

pub mod handlers;
pub mod types;

use crate::ingestion::IngestionService;
use crate::metrics;
use crate::query::QueryEngine;
use crate::security::{client_key, RateLimiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, Method},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

pub use types::ApiError;

// =============================================================================
// Application State
// =============================================================================

/// Shared state behind every handler
pub struct AppState {
    pub ingestion: IngestionService,
    pub query: QueryEngine,
    pub limiter: RateLimiter,
    /// Serve `/metrics`
    pub prometheus_enabled: bool,
    /// Empty allows every origin
    pub cors_allowed_origins: Vec<String>,
}

// =============================================================================
// Router
// =============================================================================

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);
    if cors_origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/metrics", post(handlers::ingest))
        .route("/api/metrics/latest", get(handlers::latest_metrics))
        .route("/api/metrics/history", get(handlers::history_metrics))
        .route("/api/servers", get(handlers::servers))
        .route("/api/servers/status", get(handlers::server_status))
        .route("/api/servers/status/city", get(handlers::city_status))
        .route("/api/series", get(handlers::list_series))
        .route("/api/series/latest", get(handlers::series_latest))
        .route("/api/series/query", get(handlers::series_range))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .merge(api)
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.cors_allowed_origins))
}

/// Reject requests from clients over their window budget
pub async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    if !state.limiter.allow(&key) {
        metrics::record_rate_limited();
        debug!(client = %key, path = %request.uri().path(), "Rate limited");
        return ApiError::TooManyRequests.into_response();
    }
    next.run(request).await
}
