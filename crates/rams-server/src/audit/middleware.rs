//! Capture middleware for mutating HTTP operations
//!
//! The layer observes write traffic and turns successful mutations into audit
//! records:
//! - Only configured methods (POST, PUT, PATCH, DELETE by default) are audited
//! - Reads and ignored path prefixes pass straight through, except that any
//!   5xx response is reported to the security capture
//! - The request body is copied as the handler reads it, up to a size cap,
//!   and stored with sensitive fields redacted. The handler always sees the
//!   original body
//! - For tracked entity types the "before" snapshot is loaded ahead of the
//!   handler and the "after" state is taken from the JSON response
//! - Diffing, record construction and enqueueing run in a spawned task once
//!   the response is ready, so the request path never waits for them
//!
//! Each request moves through [`CaptureState`]:
//! `Observing -> ResponseIntercepted -> EnqueuedForWrite | Discarded`.

use axum::{
    body::{Body, Bytes, HttpBody},
    extract::Request,
    http::{header::CONTENT_TYPE, Method, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{json, Value as JsonValue};
use std::{
    collections::HashSet,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::capture::SecurityCapture;
use super::context::RequestContext;
use super::details::{redact_sensitive, AuditDetails};
use super::diff::compute_changes;
use super::directory::SnapshotSource;
use super::error::AuditError;
use super::models::{AuditAction, AuditLevel, AuditRecord};
use super::writer::AuditWriter;

/// Source tag of records produced by the middleware
pub const HTTP_SOURCE: &str = "http";

/// Captured request bodies larger than this are summarized instead of stored
pub const MAX_CAPTURED_BODY_BYTES: usize = 16 * 1024;

/// Responses larger than this are passed through without extracting state
pub const MAX_INTERCEPTED_RESPONSE_BYTES: u64 = 1024 * 1024;

/// Default path segment holding the entity type (`/api/v1/<entity>/<id>`)
pub const DEFAULT_ENTITY_SEGMENT: usize = 2;

/// Default bound on loading a "before" snapshot
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(200);

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub methods: Vec<Method>,
    /// Path prefixes that are never audited
    pub ignore_paths: Vec<String>,
    /// Index of the entity-type segment among the non-empty path segments
    pub entity_segment: usize,
    /// Entity types whose changes are diffed
    pub tracked_entities: HashSet<String>,
    pub snapshot_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            methods: vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE],
            ignore_paths: vec!["/health".to_string(), "/api/v1/audit-logs".to_string()],
            entity_segment: DEFAULT_ENTITY_SEGMENT,
            tracked_entities: HashSet::new(),
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
        }
    }
}

impl CaptureConfig {
    pub fn should_capture(&self, method: &Method, path: &str) -> bool {
        self.methods.contains(method) && !self.is_ignored(path)
    }

    /// Whether `path` is an ignored prefix or lies below one
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            }
        })
    }

    /// Entity type and id addressed by `path`
    pub fn entity_target(&self, path: &str) -> Option<(String, Option<String>)> {
        let mut segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .skip(self.entity_segment);
        let entity_type = normalize_entity_type(segments.next()?);
        if entity_type.is_empty() {
            return None;
        }
        let entity_id = segments.next().map(str::to_string);
        Some((entity_type, entity_id))
    }

    pub fn is_tracked(&self, entity_type: &str) -> bool {
        self.tracked_entities.contains(entity_type)
    }
}

/// Lower snake case: `Grant-Awards` becomes `grant_awards`
pub fn normalize_entity_type(segment: &str) -> String {
    segment.trim().to_lowercase().replace('-', "_")
}

/// Audit action for an HTTP method
pub fn infer_action(method: &Method) -> Option<AuditAction> {
    match *method {
        Method::POST => Some(AuditAction::Create),
        Method::PUT | Method::PATCH => Some(AuditAction::Update),
        Method::DELETE => Some(AuditAction::Delete),
        _ => None,
    }
}

/// Lifecycle of one observed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Observing,
    ResponseIntercepted,
    EnqueuedForWrite,
    Discarded,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observing => "observing",
            Self::ResponseIntercepted => "response_intercepted",
            Self::EnqueuedForWrite => "enqueued_for_write",
            Self::Discarded => "discarded",
        }
    }
}

/// Audit capture layer
#[derive(Clone)]
pub struct AuditLayer {
    writer: AuditWriter,
    config: Arc<CaptureConfig>,
    snapshots: Option<Arc<dyn SnapshotSource>>,
    security: Option<SecurityCapture>,
}

impl AuditLayer {
    pub fn new(writer: AuditWriter, config: CaptureConfig) -> Self {
        Self {
            writer,
            config: Arc::new(config),
            snapshots: None,
            security: None,
        }
    }

    /// Load "before" snapshots of tracked entities from `source`
    pub fn with_snapshots(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(source);
        self
    }

    /// Report 5xx responses to `security`
    pub fn with_security(mut self, security: SecurityCapture) -> Self {
        self.security = Some(security);
        self
    }
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditMiddleware {
            inner,
            layer: self.clone(),
        }
    }
}

/// Audit middleware service
#[derive(Clone)]
pub struct AuditMiddleware<S> {
    inner: S,
    layer: AuditLayer,
}

impl<S> Service<Request> for AuditMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();

        Box::pin(async move {
            let method = request.method().clone();
            let Some(action) = infer_action(&method)
                .filter(|_| layer.config.should_capture(&method, request.uri().path()))
            else {
                if layer.security.is_none() {
                    return inner.call(request).await;
                }
                let (parts, body) = request.into_parts();
                let ctx = RequestContext::from_parts(&parts);
                let response = inner.call(Request::from_parts(parts, body)).await?;
                layer.report_server_error(&ctx, response.status());
                return Ok(response);
            };

            let mut state = CaptureState::Observing;
            let (parts, body) = request.into_parts();
            let ctx = RequestContext::from_parts(&parts);
            let query = parts.uri.query().map(str::to_string);
            let target = layer.config.entity_target(&ctx.path);
            let tracked = target
                .as_ref()
                .is_some_and(|(entity_type, _)| layer.config.is_tracked(entity_type));

            let before = if tracked && action != AuditAction::Create {
                match &target {
                    Some((entity_type, Some(entity_id))) => {
                        layer.load_snapshot(entity_type, entity_id).await
                    },
                    _ => None,
                }
            } else {
                None
            };

            let json_body = is_json(parts.headers.get(CONTENT_TYPE));
            let tap = BodyTap::shared();
            let body = if json_body {
                let copy = tap.clone();
                Body::new(body.map_frame(move |frame| {
                    if let Some(data) = frame.data_ref() {
                        BodyTap::record(&copy, data);
                    }
                    frame
                }))
            } else {
                body
            };
            let request = Request::from_parts(parts, body);

            let response = match inner.call(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(
                        method = %method,
                        path = %ctx.path,
                        error = %e,
                        state = CaptureState::Discarded.as_str(),
                        "Inner service failed, nothing to audit"
                    );
                    return Err(e);
                },
            };
            state = transition(state, CaptureState::ResponseIntercepted);
            let captured_body = if json_body {
                BodyTap::take(&tap).and_then(|tap| tap.into_json())
            } else {
                None
            };

            let status = response.status();
            layer.report_server_error(&ctx, status);
            if !status.is_success() {
                state = transition(state, CaptureState::Discarded);
                debug!(
                    method = %method,
                    path = %ctx.path,
                    status = %status,
                    state = state.as_str(),
                    "Mutation not successful, not audited"
                );
                return Ok(response);
            }

            let (response, after) = if tracked && action != AuditAction::Delete {
                intercept_json(response).await
            } else {
                (response, None)
            };

            let writer = layer.writer.clone();
            let guard = writer.hold();
            tokio::spawn(async move {
                let _guard = guard;
                let pending = PendingRecord {
                    action,
                    status,
                    ctx,
                    query,
                    target,
                    tracked,
                    before,
                    after,
                    captured_body,
                };
                let final_state = match pending.into_record() {
                    Ok(record) => {
                        let audit_id = record.id;
                        if writer.log(record).await {
                            transition(state, CaptureState::EnqueuedForWrite)
                        } else {
                            debug!(audit_id = %audit_id, "Audit record dropped by writer");
                            transition(state, CaptureState::Discarded)
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Failed to build audit record");
                        transition(state, CaptureState::Discarded)
                    },
                };
                debug!(state = final_state.as_str(), "Capture finished");
            });

            Ok(response)
        })
    }
}

impl AuditLayer {
    /// Hand 5xx responses to the security capture, whatever the method
    fn report_server_error(&self, ctx: &RequestContext, status: StatusCode) {
        if !status.is_server_error() {
            return;
        }
        if let Some(security) = &self.security {
            let message = status.canonical_reason().unwrap_or("Internal Server Error");
            security.server_error(ctx, status.as_u16(), message);
        }
    }

    async fn load_snapshot(&self, entity_type: &str, entity_id: &str) -> Option<JsonValue> {
        let source = self.snapshots.as_ref()?;
        match tokio::time::timeout(
            self.config.snapshot_timeout,
            source.snapshot(entity_type, entity_id),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(entity_type, entity_id, error = %e, "Failed to load before snapshot");
                None
            },
            Err(_) => {
                warn!(entity_type, entity_id, "Timed out loading before snapshot");
                None
            },
        }
    }
}

fn transition(from: CaptureState, to: CaptureState) -> CaptureState {
    debug!(from = from.as_str(), to = to.as_str(), "Capture state");
    to
}

/// Everything needed to build the record once the response has been sent on
struct PendingRecord {
    action: AuditAction,
    status: StatusCode,
    ctx: RequestContext,
    query: Option<String>,
    target: Option<(String, Option<String>)>,
    tracked: bool,
    before: Option<JsonValue>,
    after: Option<JsonValue>,
    captured_body: Option<JsonValue>,
}

impl PendingRecord {
    fn into_record(self) -> Result<AuditRecord, AuditError> {
        let changes = if self.tracked {
            match self.action {
                AuditAction::Create => compute_changes(None, self.after.as_ref()),
                AuditAction::Delete => self
                    .before
                    .as_ref()
                    .and_then(|before| compute_changes(Some(before), None)),
                _ => match (&self.before, &self.after) {
                    (Some(before), Some(after)) => compute_changes(Some(before), Some(after)),
                    _ => None,
                },
            }
        } else {
            None
        };

        let mut details = AuditDetails::new()
            .with("method", self.ctx.method.as_str())
            .with("path", self.ctx.path.as_str())
            .with("status", self.status.as_u16());
        if let Some(body) = self.captured_body {
            details.insert("request", body);
        }
        if let Some(query) = &self.query {
            details.insert("query", query.as_str());
        }

        let mut builder = AuditRecord::builder(self.action.clone())
            .level(AuditLevel::Info)
            .actor_id(self.ctx.actor.map(|a| a.id))
            .details(details)
            .metadata(self.ctx.metadata(HTTP_SOURCE))
            .changes(changes);

        if let Some((entity_type, entity_id)) = self.target {
            let entity_id = entity_id.or_else(|| {
                if self.action == AuditAction::Create {
                    self.after.as_ref().and_then(id_of)
                } else {
                    None
                }
            });
            builder = builder.entity(entity_type, entity_id);
        }

        builder.build()
    }
}

/// Copy of the request body as the handler streams it, capped at
/// [`MAX_CAPTURED_BODY_BYTES`]
#[derive(Debug, Default)]
struct BodyTap {
    bytes: Vec<u8>,
    size: usize,
}

type SharedTap = Arc<Mutex<BodyTap>>;

impl BodyTap {
    fn shared() -> SharedTap {
        Arc::new(Mutex::new(Self::default()))
    }

    fn record(tap: &SharedTap, data: &Bytes) {
        let Ok(mut tap) = tap.lock() else {
            return;
        };
        tap.size += data.len();
        if tap.size <= MAX_CAPTURED_BODY_BYTES {
            tap.bytes.extend_from_slice(data);
        } else {
            tap.bytes = Vec::new();
        }
    }

    fn take(tap: &SharedTap) -> Option<Self> {
        tap.lock().ok().map(|mut tap| std::mem::take(&mut *tap))
    }

    /// The redacted JSON body, a size summary when it was too large, or
    /// nothing when the handler did not read a JSON document
    fn into_json(self) -> Option<JsonValue> {
        if self.size == 0 {
            return None;
        }
        if self.size > MAX_CAPTURED_BODY_BYTES {
            return Some(json!({ "truncated": true, "size": self.size }));
        }
        let mut value: JsonValue = serde_json::from_slice(&self.bytes).ok()?;
        redact_sensitive(&mut value);
        Some(value)
    }
}

fn is_json(content_type: Option<&axum::http::HeaderValue>) -> bool {
    content_type
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json") || v.contains("+json"))
}

/// Buffer a JSON response and extract the entity state from it.
///
/// The state is the `data` field of the standard envelope, or the whole body.
/// Streaming or oversized bodies are passed through untouched.
async fn intercept_json(response: Response) -> (Response, Option<JsonValue>) {
    if !is_json(response.headers().get(CONTENT_TYPE)) {
        return (response, None);
    }
    let bounded = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|size| size <= MAX_INTERCEPTED_RESPONSE_BYTES);
    if !bounded {
        debug!("Response body too large or unsized, after state not captured");
        return (response, None);
    }

    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Failed to buffer response body");
            return (Response::from_parts(parts, Body::empty()), None);
        },
    };

    let after = serde_json::from_slice::<JsonValue>(&bytes)
        .ok()
        .map(|mut value| match value.get_mut("data") {
            Some(data) => data.take(),
            None => value,
        });

    (Response::from_parts(parts, Body::from(bytes)), after)
}

fn id_of(state: &JsonValue) -> Option<String> {
    match state.get("id")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
