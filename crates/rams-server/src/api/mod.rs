//! HTTP API assembly
//!
//! Mounts the audit query surface under `/api/v1/audit-logs`, the health
//! endpoint, and any domain routes supplied by the embedding application,
//! then wraps everything in the middleware stack. The audit layer sits
//! innermost so it sees uncompressed bodies.

pub mod pagination;
pub mod response;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;

use crate::audit::{audit_routes, AuditLayer, AuditState, AuditStore, AuditWriter, WriterStatsSnapshot};
use crate::config::Config;
use crate::error::AppError;
use crate::middleware;
use response::ApiResponse;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub audit: AuditState,
    pub store: Arc<dyn AuditStore>,
    pub writer: AuditWriter,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub database: &'static str,
    pub store: &'static str,
    pub audit_writer: WriterStatsSnapshot,
}

/// Create the application router with all routes and middleware
///
/// `domain_routes` carry full paths (e.g. `/api/v1/projects/:id`) and are the
/// traffic the audit layer records.
pub fn create_router(state: AppState, audit_layer: AuditLayer, domain_routes: Router, config: &Config) -> Router {
    let audit_api = audit_routes().with_state(state.audit.clone());

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1/audit-logs", audit_api)
        .merge(domain_routes)
        // Apply layers from innermost to outermost
        .layer(audit_layer)
        .layer(axum::middleware::from_fn_with_state(
            config.auth.trust_identity_headers,
            middleware::identity_from_headers,
        ))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, AppError> {
    if let Err(e) = state.store.ping().await {
        tracing::error!(store = state.store.name(), error = %e, "Audit store health check failed");
        return Err(AppError::Unavailable(format!(
            "audit store '{}' is unreachable",
            state.store.name()
        )));
    }

    Ok(ApiResponse::success(HealthReport {
        status: "healthy",
        database: "connected",
        store: state.store.name(),
        audit_writer: state.writer.stats(),
    })
    .into_response())
}
