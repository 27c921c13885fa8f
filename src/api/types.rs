//! Request/response bodies and error mapping for the HTTP API

use crate::error::{IngestionError, QueryError, StorageError};
use crate::ingestion::WriterStats;
use axum::async_trait;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

// =============================================================================
// Response bodies
// =============================================================================

/// `{"status": "ok"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// `{"error": msg}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub version: String,
    /// Storage backend name
    pub storage: String,
    /// Storage error when degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
    pub writer: WriterStatsResponse,
    pub rate_limiter: RateLimiterResponse,
}

/// Writer counters plus current queue depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterStatsResponse {
    pub queue_depth: usize,
    pub queued: u64,
    pub dropped: u64,
    pub direct_written: u64,
    pub flushed: u64,
    pub batches: u64,
    pub flush_errors: u64,
}

impl WriterStatsResponse {
    pub fn new(stats: WriterStats, queue_depth: usize) -> Self {
        Self {
            queue_depth,
            queued: stats.queued,
            dropped: stats.dropped,
            direct_written: stats.direct_written,
            flushed: stats.flushed,
            batches: stats.batches,
            flush_errors: stats.flush_errors,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterResponse {
    pub enabled: bool,
    pub tracked_clients: usize,
    pub rejected: u64,
}

// =============================================================================
// Errors
// =============================================================================

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 404
    NotFound(String),
    /// 429
    TooManyRequests,
    /// 500
    Internal(String),
    /// 503
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Internal(m)
            | ApiError::Unavailable(m) => m.clone(),
            ApiError::TooManyRequests => "rate limit exceeded".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(ErrorResponse {
                error: self.message(),
            }),
        )
            .into_response()
    }
}

impl From<IngestionError> for ApiError {
    fn from(e: IngestionError) -> Self {
        match e {
            IngestionError::Validation(msg) => ApiError::BadRequest(msg),
            IngestionError::ChannelClosed(_) | IngestionError::ShutdownError(_) => {
                ApiError::Unavailable(e.to_string())
            }
            other => {
                error!(error = %other, "Ingestion failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::NotFound(msg) => ApiError::NotFound(msg),
            QueryError::Storage(StorageError::NotFound(msg)) => ApiError::NotFound(msg),
            QueryError::Storage(storage) => {
                error!(error = %storage, "Query failed");
                ApiError::Internal(storage.to_string())
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("invalid query string: {}", rejection.body_text()))
    }
}

/// `Query` extractor whose rejection is an [`ApiError`] JSON body
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}
