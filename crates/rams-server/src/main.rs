//! RAMS Server - Main entry point

use anyhow::Result;
use axum::Router;
use rams_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::watch};
use tracing::info;

use rams_server::{
    api::{self, AppState},
    audit::{
        capture::DEFAULT_LOOKUP_TIMEOUT, spawn_retention, AuditLayer, AuditService, AuditState,
        AuditStore, AuditWriter, PgAuditStore, PgDirectory, PgSnapshotSource, SecurityCapture,
    },
    config::Config,
    AppError,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("rams-server")
        .filter_directives("rams_server=debug,tower_http=debug,sqlx=info")
        .build()
        // Environment variables take precedence
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting RAMS Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );
    if config.auth.trust_identity_headers {
        tracing::warn!("Trusting x-user-id / x-user-role headers; run only behind an authenticating gateway");
    }

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    run_migrations(&db_pool).await?;

    info!("Database migrations completed");

    // Audit write path
    let store: Arc<dyn AuditStore> = Arc::new(PgAuditStore::new(db_pool.clone()));
    let (writer, worker) = AuditWriter::spawn(store.clone(), config.audit.writer_config()?);
    let directory = Arc::new(PgDirectory::new(db_pool.clone()));
    let security =
        SecurityCapture::new(writer.clone()).with_directory(directory.clone(), DEFAULT_LOOKUP_TIMEOUT);

    // Query surface and scheduled retention
    let service = AuditService::new(store.clone())
        .with_directory(directory)
        .with_settings(config.audit.analytics_settings());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = spawn_retention(service.clone(), config.audit.retention_config(), shutdown_rx);

    let audit_layer = AuditLayer::new(writer.clone(), config.audit.capture_config()?)
        .with_snapshots(Arc::new(PgSnapshotSource::new(db_pool.clone())))
        .with_security(security.clone());

    let state = AppState {
        audit: AuditState { service, security },
        store,
        writer,
    };

    // Domain handlers are mounted by the embedding application
    let app = api::create_router(state, audit_layer, Router::new(), &config);

    // Create socket address
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Start server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
    .await?;

    // Stop retention, then drain the audit queue
    let _ = shutdown_tx.send(true);
    if let Some(handle) = retention {
        if let Err(e) = handle.await {
            tracing::error!("Retention task failed: {}", e);
        }
    }
    worker.shutdown().await;

    info!("Server shut down gracefully");

    Ok(())
}

async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), AppError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    // Give ongoing requests time to complete
    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
