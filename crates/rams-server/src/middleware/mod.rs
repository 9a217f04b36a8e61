//! HTTP middleware for the RAMS server
//!
//! This module provides middleware for:
//! - CORS (Cross-Origin Resource Sharing)
//! - Request logging with tracing
//! - Caller identity from gateway headers, when the deployment trusts them
//!
//! Audit capture lives in [`crate::audit::middleware`].

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, Method},
    middleware::Next,
    response::Response,
};
use rams_common::{
    identity::{USER_ID_HEADER, USER_ROLE_HEADER},
    Actor,
};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::audit::context::{actor_from_headers, REQUEST_ID_HEADER, SESSION_ID_HEADER};
use crate::config::CorsConfig;

/// Create CORS layer from configuration
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let mut cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::ACCEPT_LANGUAGE,
            header::CONTENT_LANGUAGE,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_ROLE_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderName::from_static(SESSION_ID_HEADER),
        ])
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(3600));

    // Credentials cannot be combined with a wildcard origin
    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*") {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<_> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors = cors.allow_origin(origins);
        if config.allow_credentials {
            cors = cors.allow_credentials(true);
        }
    }

    cors
}

/// Create tracing/logging layer
pub fn tracing_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

/// Turn the `x-user-id` / `x-user-role` headers into the request's [`Actor`].
///
/// Only for deployments behind a gateway that authenticates callers and
/// overwrites these headers. With `trusted` false the headers are ignored.
/// An [`Actor`] already in the extensions is never replaced.
///
/// ```rust,ignore
/// router.layer(axum::middleware::from_fn_with_state(true, identity_from_headers))
/// ```
pub async fn identity_from_headers(State(trusted): State<bool>, mut request: Request, next: Next) -> Response {
    if trusted && request.extensions().get::<Actor>().is_none() {
        if let Some(actor) = actor_from_headers(request.headers()) {
            request.extensions_mut().insert(actor);
        }
    }
    next.run(request).await
}
