//! HTTP endpoint handlers

use super::types::*;
use super::AppState;
use crate::metrics;
use crate::query::{Page, QueryParams};
use crate::types::{
    CanonicalSnapshot, CityStatusSummary, RawBatch, SeriesMeta, SeriesPointRecord, ServerStatus,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

type ApiResult<T> = Result<Json<T>, ApiError>;

// =============================================================================
// Health & Metrics Handlers
// =============================================================================

/// Liveness probe
pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// Health check with storage connectivity and writer counters
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.query.store();
    let storage_error = store.health_check().await.err().map(|e| e.to_string());
    let healthy = storage_error.is_none();
    metrics::set_health(healthy);
    if let Some(e) = &storage_error {
        warn!(error = %e, "Health check failed");
    }

    let writer = state.ingestion.writer();
    let limiter = state.limiter.stats();
    let body = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: store.backend_name().to_string(),
        storage_error,
        writer: WriterStatsResponse::new(writer.stats(), writer.queue_depth()),
        rate_limiter: RateLimiterResponse {
            enabled: state.limiter.is_enabled(),
            tracked_clients: limiter.tracked_clients,
            rejected: limiter.rejected,
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Prometheus text exposition
pub async fn prometheus_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.prometheus_enabled {
        return ApiError::NotFound("metrics disabled".to_string()).into_response();
    }
    match metrics::gather_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => ApiError::Internal(e).into_response(),
    }
}

// =============================================================================
// Ingestion Handler
// =============================================================================

/// Accept one agent batch
///
/// The body is decoded regardless of content type.
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<StatusResponse> {
    let batch: RawBatch = serde_json::from_slice(&body).map_err(|e| {
        metrics::record_ingest("invalid");
        debug!(error = %e, bytes = body.len(), "Rejected undecodable payload");
        ApiError::BadRequest(format!("invalid payload: {}", e))
    })?;

    state.ingestion.ingest(&batch, Utc::now()).await?;
    Ok(Json(StatusResponse::ok()))
}

// =============================================================================
// Query Handlers
// =============================================================================

pub async fn latest_metrics(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<CanonicalSnapshot>> {
    Ok(Json(state.query.latest_metrics(&params).await?))
}

pub async fn history_metrics(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<CanonicalSnapshot>> {
    Ok(Json(state.query.history_metrics(&params).await?))
}

pub async fn servers(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<String>> {
    Ok(Json(state.query.servers(&params).await?))
}

pub async fn server_status(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<ServerStatus>> {
    Ok(Json(state.query.server_status(&params).await?))
}

pub async fn city_status(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<CityStatusSummary>> {
    Ok(Json(state.query.city_status(&params).await?))
}

pub async fn list_series(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<SeriesMeta>> {
    Ok(Json(state.query.list_series(&params).await?))
}

pub async fn series_latest(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<SeriesPointRecord> {
    Ok(Json(state.query.series_latest(&params).await?))
}

pub async fn series_range(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<QueryParams>,
) -> ApiResult<Page<SeriesPointRecord>> {
    Ok(Json(state.query.series_range(&params).await?))
}
