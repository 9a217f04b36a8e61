//! Integration tests for middleware
//!
//! These tests verify:
//! - CORS headers are correctly set, including the identity headers
//! - Export downloads expose `Content-Disposition` to browsers
//! - The middleware stack leaves handler responses intact

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower::ServiceExt;

use rams_server::{config::CorsConfig, middleware};

mod common;
use common::{body_json, get as get_request, TestApp};

fn cors_app(cors_config: CorsConfig) -> Router {
    async fn ping() -> impl IntoResponse {
        Json(json!({ "status": "ok" }))
    }

    Router::new()
        .route("/ping", get(ping))
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&cors_config))
}

#[tokio::test]
async fn test_cors_headers_with_specific_origin() {
    let app = cors_app(CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: true,
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
        "true"
    );
    let exposed = headers
        .get(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_lowercase();
    assert!(exposed.contains("content-disposition"));
}

#[tokio::test]
async fn test_cors_preflight_allows_identity_headers() {
    let app = cors_app(CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: true,
    });

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/ping")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-user-id,x-user-role")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    assert!(headers.contains_key(header::ACCESS_CONTROL_MAX_AGE));
    let allowed = headers
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_lowercase();
    assert!(allowed.contains("x-user-id"));
    assert!(allowed.contains("x-user-role"));
}

#[tokio::test]
async fn test_cors_wildcard_drops_credentials() {
    let app = cors_app(CorsConfig {
        allowed_origins: vec!["*".to_string()],
        allow_credentials: true,
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ping")
                .header(header::ORIGIN, "http://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
}

#[tokio::test]
async fn test_full_stack_passes_responses_through() {
    let app = TestApp::new();

    let response = app
        .request(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(true));

    let response = app.request(get_request("/no-such-route", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
