//! Integration tests for request capture under load and store failures
//!
//! These tests verify:
//! - A slow store never delays the response
//! - A failing store never fails the request
//! - Concurrent mutations each produce exactly one record

use async_trait::async_trait;
use axum::{
    extract::Path,
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rams_server::audit::{
    analytics::AuditAggregates, AuditAction, AuditFilter, AuditLayer, AuditRecord, AuditStore,
    AuditWriter, CaptureConfig, InMemoryAuditStore, PageRequest, StoreError, WriterConfig,
};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;
use uuid::Uuid;

mod common;
use common::{all_records, init_tracing, researcher, send_json};

/// Store whose inserts are slow, or fail outright
struct DegradedStore {
    inner: InMemoryAuditStore,
    insert_delay: Duration,
    fail_inserts: bool,
}

impl DegradedStore {
    fn slow(delay: Duration) -> Self {
        Self {
            inner: InMemoryAuditStore::new(),
            insert_delay: delay,
            fail_inserts: false,
        }
    }

    fn failing() -> Self {
        Self {
            inner: InMemoryAuditStore::new(),
            insert_delay: Duration::ZERO,
            fail_inserts: true,
        }
    }
}

#[async_trait]
impl AuditStore for DegradedStore {
    fn name(&self) -> &'static str {
        "degraded"
    }

    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        tokio::time::sleep(self.insert_delay).await;
        if self.fail_inserts {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.insert(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        self.inner.get(id).await
    }

    async fn find(&self, filter: &AuditFilter, page: PageRequest) -> Result<Vec<AuditRecord>, StoreError> {
        self.inner.find(filter, page).await
    }

    async fn find_all(&self, filter: &AuditFilter, limit: i64) -> Result<Vec<AuditRecord>, StoreError> {
        self.inner.find_all(filter, limit).await
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64, StoreError> {
        self.inner.count(filter).await
    }

    async fn aggregate(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<AuditAggregates, StoreError> {
        self.inner.aggregate(since, until).await
    }

    async fn failed_logins_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        self.inner.failed_logins_since(since).await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_older_than(cutoff).await
    }
}

async fn create_project(Json(payload): Json<JsonValue>) -> impl IntoResponse {
    let id = payload["id"].as_str().unwrap_or("p-0").to_string();
    (
        StatusCode::CREATED,
        Json(json!({"success": true, "data": {"id": id, "title": payload["title"]}})),
    )
}

async fn update_project(Path(id): Path<String>, Json(payload): Json<JsonValue>) -> impl IntoResponse {
    Json(json!({"success": true, "data": {"id": id, "title": payload["title"]}}))
}

fn app(writer: AuditWriter) -> Router {
    let config = CaptureConfig {
        tracked_entities: ["projects".to_string()].into_iter().collect(),
        ..CaptureConfig::default()
    };
    Router::new()
        .route("/api/v1/projects", post(create_project))
        .route("/api/v1/projects/:id", put(update_project))
        .layer(AuditLayer::new(writer, config))
}

#[tokio::test]
async fn test_slow_store_does_not_delay_responses() {
    init_tracing();
    let store = Arc::new(DegradedStore::slow(Duration::from_millis(500)));
    let (writer, worker) = AuditWriter::spawn(store.clone(), WriterConfig::default());
    let router = app(writer);

    let started = Instant::now();
    for i in 0..3 {
        let response = router
            .clone()
            .oneshot(send_json(
                Method::POST,
                "/api/v1/projects",
                Some(researcher()),
                &json!({"id": format!("p-{}", i), "title": "Soil carbon"}),
            ))
            .await
            .expect("router is infallible");
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "responses waited on the store: {:?}",
        started.elapsed()
    );

    // Shutdown drains the queue even though every insert is slow
    let stats = worker.shutdown().await;
    assert_eq!(stats.written, 3);
    assert_eq!(all_records(&store.inner).await.len(), 3);
}

#[tokio::test]
async fn test_failing_store_does_not_fail_requests() {
    init_tracing();
    let store = Arc::new(DegradedStore::failing());
    let (writer, worker) = AuditWriter::spawn(store.clone(), WriterConfig::default());
    let router = app(writer);

    let response = router
        .clone()
        .oneshot(send_json(
            Method::PUT,
            "/api/v1/projects/p-1",
            Some(researcher()),
            &json!({"title": "Renamed"}),
        ))
        .await
        .expect("router is infallible");
    assert_eq!(response.status(), StatusCode::OK);
    let body = common::body_json(response).await;
    assert_eq!(body["data"]["title"], json!("Renamed"));

    let stats = worker.shutdown().await;
    assert_eq!(stats.written, 0);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_concurrent_mutations_each_recorded_once() {
    init_tracing();
    let store = Arc::new(InMemoryAuditStore::new());
    let (writer, worker) = AuditWriter::spawn(store.clone(), WriterConfig::default());
    let router = app(writer);

    let requests = (0..50).map(|i| {
        let router = router.clone();
        async move {
            router
                .oneshot(send_json(
                    Method::POST,
                    "/api/v1/projects",
                    Some(researcher()),
                    &json!({"id": format!("p-{}", i), "title": format!("Project {}", i)}),
                ))
                .await
                .expect("router is infallible")
                .status()
        }
    });
    let statuses = join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::CREATED));

    let stats = worker.shutdown().await;
    assert_eq!(stats.written, 50);
    assert_eq!(stats.dropped, 0);

    let records = all_records(&store).await;
    assert_eq!(records.len(), 50);
    assert!(records.iter().all(|r| r.action == AuditAction::Create));
    let entity_ids: HashSet<String> = records.iter().filter_map(|r| r.entity_id.clone()).collect();
    assert_eq!(entity_ids.len(), 50);
}
