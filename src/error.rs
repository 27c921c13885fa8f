//! Error types for the telemetry backend

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ingestion error
    #[error("Ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    /// Query error
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage errors
///
/// Raised by `MetricsStore` implementations. The database variant keeps the
/// driver error intact so callers can log the full chain.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database driver error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Requested row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend is not reachable or not configured
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Ingestion errors
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Writer queue closed unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Payload is structurally valid but unusable
    #[error("{0}")]
    Validation(String),

    /// Snapshot could not be persisted
    #[error("failed to persist metric: {0}")]
    Snapshot(StorageError),

    /// Synchronous series write failed
    #[error("failed to persist series points: {0}")]
    DirectWrite(StorageError),

    /// Shutdown error
    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Query errors
///
/// Parameter variants map to client errors, `Storage` maps to a server error.
#[derive(Error, Debug)]
pub enum QueryError {
    /// `page` or `page_size` is not a positive integer
    #[error("invalid pagination parameters")]
    InvalidPagination,

    /// A duration parameter could not be parsed
    #[error("invalid {param}")]
    InvalidDuration {
        /// Name of the query parameter
        param: &'static str,
        /// The rejected value
        value: String,
    },

    /// The tag filter is not a JSON object
    #[error("invalid tags filter")]
    InvalidTagFilter,

    /// Required parameter(s) missing
    #[error("{0} required")]
    MissingParameter(&'static str),

    /// No row matched
    #[error("{0}")]
    NotFound(String),

    /// Storage failure
    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
