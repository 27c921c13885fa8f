//! Fleet Telemetry HTTP Server
//!
//! # Endpoints
//!
//! ## Ingest
//! - `POST /api/metrics` - Agent metric batch
//!
//! ## Query
//! - `GET /api/metrics/latest`, `GET /api/metrics/history`
//! - `GET /api/servers`, `GET /api/servers/status`, `GET /api/servers/status/city`
//! - `GET /api/series`, `GET /api/series/latest`, `GET /api/series/query`
//!
//! ## Admin
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//!
//! # CLI Commands
//!
//! - `start` - Start the HTTP server (default if no command specified)
//! - `check-config` - Validate configuration and print a summary
//! - `print-schema` - Print the PostgreSQL DDL
//!
//! # Configuration
//!
//! The server reads configuration from:
//! 1. `--config <path>`
//! 2. `TELEMETRY_CONFIG` environment variable (path to TOML file)
//! 3. `./application.toml` in current directory
//! 4. Default configuration

mod config;

use clap::{Parser, Subcommand};
use config::{load_config, redact_url};
use fleet_telemetry::{
    api::{build_router, AppState},
    config::{Config, StorageBackend},
    ingestion::IngestionService,
    metrics,
    query::QueryEngine,
    security::RateLimiter,
    storage::{schema_statements, InMemoryStore, MetricsStore, PgStore},
    Error,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// CLI Definition
// =============================================================================

/// Fleet Telemetry - metric ingestion and query backend
#[derive(Parser)]
#[command(name = "telemetry-server")]
#[command(version)]
#[command(about = "Telemetry ingestion and query server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides TELEMETRY_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,

    /// Print the database schema
    PrintSchema,
}

/// Load, override and validate configuration
fn resolve_config(cli: &Cli) -> fleet_telemetry::Result<Config> {
    let (mut config, source) =
        load_config(cli.config.as_deref()).map_err(Error::Configuration)?;
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    config.validate().map_err(Error::Configuration)?;
    eprintln!("[config] Loaded configuration from {}", source);
    Ok(config)
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Server Settings:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Log level: {}", config.server.log_level);
    println!();
    println!("Storage:");
    println!("  Backend: {:?}", config.storage.backend);
    if config.storage.backend == StorageBackend::Postgres {
        println!(
            "  Database: {}",
            redact_url(&config.database.connection_url())
        );
        println!("  Max connections: {}", config.database.max_connections);
        println!("  Auto migrate: {}", config.database.auto_migrate);
    }
    println!();
    println!("Writer:");
    println!("  Queue capacity: {}", config.writer.queue_capacity);
    println!("  Workers: {}", config.writer.num_workers);
    println!("  Batch size: {}", config.writer.batch_size);
    println!("  Flush interval: {} ms", config.writer.flush_interval_ms);
    println!("  Overflow: {:?}", config.writer.overflow);
    println!("  Direct insert: {}", config.writer.direct_insert);
    println!();
    println!("Rate Limit:");
    println!(
        "  {} requests / {} s",
        config.rate_limit.max_requests, config.rate_limit.window_secs
    );
    println!();
    println!("Monitoring:");
    println!(
        "  Prometheus enabled: {}",
        config.monitoring.prometheus_enabled
    );
    println!("  Diagnostics: {}", config.diagnostics.enabled);

    Ok(())
}

/// Print DDL in execution order
fn cmd_print_schema() {
    for stmt in schema_statements() {
        println!("{};", stmt.trim());
        println!();
    }
}

// =============================================================================
// Server Setup
// =============================================================================

/// Open the configured storage backend and provision its schema
async fn init_storage(config: &Config) -> fleet_telemetry::Result<Arc<dyn MetricsStore>> {
    let store: Arc<dyn MetricsStore> = match config.storage.backend {
        StorageBackend::Postgres => {
            debug!(
                url = %redact_url(&config.database.connection_url()),
                "Connecting to PostgreSQL"
            );
            Arc::new(PgStore::connect(&config.database).await?)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage, data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };

    if config.database.auto_migrate {
        store.ensure_schema().await?;
        info!(backend = store.backend_name(), "Schema ready");
    }
    Ok(store)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                warn!(
                    error = %e,
                    "Ctrl+C handler installation failed - graceful shutdown unavailable"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn cmd_start(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Fleet Telemetry Server v{}", env!("CARGO_PKG_VERSION"));
    metrics::init();

    let store = init_storage(&config).await?;
    let ingestion = IngestionService::start(
        &config.normalizer,
        &config.writer,
        &config.diagnostics,
        Arc::clone(&store),
    )?;

    let state = Arc::new(AppState {
        ingestion,
        query: QueryEngine::new(store),
        limiter: RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window()),
        prometheus_enabled: config.monitoring.prometheus_enabled,
        cors_allowed_origins: config.server.cors_allowed_origins.clone(),
    });

    let app = build_router(state.clone());

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Queued series points belong to the writer until drained
    info!("Draining writer queue...");
    if let Err(e) = state.ingestion.writer().shutdown().await {
        warn!(error = %e, "Writer did not shut down cleanly");
    }

    info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => cmd_check_config(&cli),
        Some(Commands::PrintSchema) => {
            cmd_print_schema();
            Ok(())
        }
        Some(Commands::Start) | None => cmd_start(&cli).await,
    }
}
