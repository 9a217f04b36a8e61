//! Common test utilities for RAMS server integration tests
//!
//! Builds the full application router over an in-memory audit store so the
//! HTTP surface, the capture middleware and the background writer can be
//! exercised without a database.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{get, TestApp};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let app = TestApp::new();
//!     let response = app.request(get("/health", None)).await;
//!     let store = app.drain().await;
//! }
//! ```

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use rams_common::{
    identity::{USER_ID_HEADER, USER_ROLE_HEADER},
    Actor, Role,
};
use rams_server::{
    api::{create_router, AppState},
    audit::{
        AuditFilter, AuditLayer, AuditRecord, AuditService, AuditState, AuditStore,
        AuditWorkerHandle, AuditWriter, CaptureConfig, InMemoryAuditStore, RecordMetadata,
        SecurityCapture, StaticDirectory, WriterConfig,
    },
    config::Config,
};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Once};
use tower::ServiceExt;
use uuid::Uuid;

static TRACING: Once = Once::new();

/// Install a test subscriber once per binary; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Full application over an in-memory store
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryAuditStore>,
    worker: AuditWorkerHandle,
}

impl TestApp {
    /// Deployed behind a gateway: the identity headers are trusted
    pub fn new() -> Self {
        Self::build(Router::new(), StaticDirectory::new(), gateway_config())
    }

    /// Default configuration: identity headers are ignored
    pub fn without_gateway() -> Self {
        Self::build(Router::new(), StaticDirectory::new(), Config::default())
    }

    pub fn with_directory(directory: StaticDirectory) -> Self {
        Self::build(Router::new(), directory, gateway_config())
    }

    pub fn with_domain_routes(domain_routes: Router) -> Self {
        Self::build(domain_routes, StaticDirectory::new(), gateway_config())
    }

    fn build(domain_routes: Router, directory: StaticDirectory, config: Config) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryAuditStore::new());
        let (writer, worker) = AuditWriter::spawn(store.clone(), WriterConfig::default());
        let directory = Arc::new(directory);
        let security = SecurityCapture::new(writer.clone());
        let service = AuditService::new(store.clone()).with_directory(directory);

        let capture = CaptureConfig {
            tracked_entities: ["projects".to_string()].into_iter().collect(),
            ..CaptureConfig::default()
        };
        let layer = AuditLayer::new(writer.clone(), capture).with_security(security.clone());

        let state = AppState {
            audit: AuditState { service, security },
            store: store.clone(),
            writer,
        };
        let router = create_router(state, layer, domain_routes, &config);

        Self {
            router,
            store,
            worker,
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    /// Stop the writer once every pending record is stored and hand back
    /// the store
    pub async fn drain(self) -> Arc<InMemoryAuditStore> {
        self.worker.shutdown().await;
        self.store
    }
}

fn gateway_config() -> Config {
    let mut config = Config::default();
    config.auth.trust_identity_headers = true;
    config
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin)
}

pub fn auditor() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Auditor)
}

pub fn researcher() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Researcher)
}

fn with_identity(builder: axum::http::request::Builder, actor: Option<Actor>) -> axum::http::request::Builder {
    match actor {
        Some(actor) => builder
            .header(USER_ID_HEADER, actor.id.to_string())
            .header(USER_ROLE_HEADER, actor.role.as_str()),
        None => builder,
    }
}

pub fn get(uri: &str, actor: Option<Actor>) -> Request<Body> {
    with_identity(Request::builder().method(Method::GET).uri(uri), actor)
        .body(Body::empty())
        .expect("valid request")
}

pub fn send_json(method: Method, uri: &str, actor: Option<Actor>, body: &JsonValue) -> Request<Body> {
    with_identity(Request::builder().method(method).uri(uri), actor)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("readable body")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response) -> JsonValue {
    serde_json::from_slice(&body_bytes(response).await).expect("JSON body")
}

/// A record with an explicit creation time, for seeding the store directly
pub fn record_at(action: &str, created_at: DateTime<Utc>) -> AuditRecord {
    AuditRecord::builder(action)
        .created_at(created_at)
        .build()
        .expect("valid record")
}

/// A failed login from `ip` for `identifier`
pub fn failed_login(ip: &str, identifier: &str, created_at: DateTime<Utc>) -> AuditRecord {
    let mut metadata = RecordMetadata::new("security");
    metadata.ip = Some(ip.to_string());
    AuditRecord::builder("AUTH_LOGIN_FAILED")
        .level(rams_server::audit::AuditLevel::Warning)
        .detail("identifier", identifier)
        .metadata(metadata)
        .created_at(created_at)
        .build()
        .expect("valid record")
}

pub async fn seed(store: &InMemoryAuditStore, records: impl IntoIterator<Item = AuditRecord>) {
    for record in records {
        store.insert(&record).await.expect("insert");
    }
}

pub async fn all_records(store: &InMemoryAuditStore) -> Vec<AuditRecord> {
    store
        .find_all(&AuditFilter::default(), i64::MAX)
        .await
        .expect("find_all")
}
