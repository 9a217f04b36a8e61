//! Error and security event capture
//!
//! Authentication outcomes, access denials and unhandled server errors are
//! recorded through the same non-blocking writer as captured mutations.
//! Recording never fails from the caller's point of view: problems are
//! logged and the record is dropped.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::RequestContext;
use super::directory::Directory;
use super::error::AuditError;
use super::models::{AuditAction, AuditLevel, AuditRecord, RecordMetadata};
use super::writer::AuditWriter;

/// Source tag of records produced here
pub const SECURITY_SOURCE: &str = "security";

/// Default bound on the actor existence lookup
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct SecurityCapture {
    writer: AuditWriter,
    directory: Option<Arc<dyn Directory>>,
    lookup_timeout: Duration,
}

impl SecurityCapture {
    pub fn new(writer: AuditWriter) -> Self {
        Self {
            writer,
            directory: None,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Verify actors against `directory` before attaching them to error records
    pub fn with_directory(mut self, directory: Arc<dyn Directory>, lookup_timeout: Duration) -> Self {
        self.directory = Some(directory);
        self.lookup_timeout = lookup_timeout;
        self
    }

    pub fn writer(&self) -> &AuditWriter {
        &self.writer
    }

    /// Record a successful login of `actor_id`
    pub fn login_succeeded(&self, ctx: &RequestContext, actor_id: Uuid, identifier: &str) {
        info!(actor_id = %actor_id, ip = ?ctx.ip, "Login succeeded");
        let record = AuditRecord::builder(AuditAction::LoginSuccess)
            .level(AuditLevel::Info)
            .actor_id(Some(actor_id))
            .entity("users", Some(actor_id.to_string()))
            .detail("identifier", identifier)
            .detail("method", ctx.method.as_str())
            .metadata(ctx.metadata(SECURITY_SOURCE))
            .build();
        self.submit(record);
    }

    /// Record a failed login attempt for `identifier`
    pub fn login_failed(&self, ctx: &RequestContext, identifier: &str, reason: &str) {
        warn!(ip = ?ctx.ip, reason, "Login failed");
        let record = AuditRecord::builder(AuditAction::LoginFailed)
            .level(AuditLevel::Warning)
            .detail("identifier", identifier)
            .detail("reason", reason)
            .metadata(ctx.metadata(SECURITY_SOURCE))
            .build();
        self.submit(record);
    }

    /// Record that the caller was refused `operation`
    pub fn access_denied(&self, ctx: &RequestContext, operation: &str, required_role: Option<&str>) {
        warn!(
            actor_id = ?ctx.actor.map(|a| a.id),
            operation,
            path = %ctx.path,
            "Access denied"
        );
        let mut builder = AuditRecord::builder(AuditAction::AccessDenied)
            .level(AuditLevel::Warning)
            .actor_id(ctx.actor.map(|a| a.id))
            .detail("operation", operation)
            .detail("path", ctx.path.as_str())
            .metadata(ctx.metadata(SECURITY_SOURCE));
        if let Some(role) = required_role {
            builder = builder.detail("required_role", role);
        }
        self.submit(builder.build());
    }

    /// Record an unhandled server error.
    ///
    /// The actor is verified off the request path; an unknown or
    /// unverifiable actor is left out of the record.
    pub fn server_error(&self, ctx: &RequestContext, status: u16, message: &str) {
        let capture = self.clone();
        let metadata = ctx.metadata(SECURITY_SOURCE);
        let actor_id = ctx.actor.map(|a| a.id);
        let method = ctx.method.clone();
        let path = ctx.path.clone();
        let message = message.to_string();
        let guard = self.writer.hold();

        tokio::spawn(async move {
            let _guard = guard;
            let actor_id = match actor_id {
                Some(id) => capture.verified_actor(id).await,
                None => None,
            };
            let record = AuditRecord::builder(AuditAction::ServerError)
                .level(AuditLevel::Error)
                .actor_id(actor_id)
                .detail("message", message)
                .detail("status", status)
                .detail("method", method)
                .detail("path", path)
                .metadata(metadata)
                .build();
            capture.submit(record);
        });
    }

    /// Record a server error that did not originate from an HTTP request
    pub fn system_error(&self, component: &str, message: &str) {
        let record = AuditRecord::builder(AuditAction::ServerError)
            .level(AuditLevel::Error)
            .detail("message", message)
            .detail("component", component)
            .metadata(RecordMetadata::new("system"))
            .build();
        self.submit(record);
    }

    async fn verified_actor(&self, id: Uuid) -> Option<Uuid> {
        let Some(directory) = &self.directory else {
            return Some(id);
        };
        match tokio::time::timeout(self.lookup_timeout, directory.actor_exists(id)).await {
            Ok(Ok(true)) => Some(id),
            Ok(Ok(false)) => {
                debug!(actor_id = %id, "Actor no longer exists, recording without actor");
                None
            },
            Ok(Err(err)) => {
                debug!(actor_id = %id, error = %err, "Actor lookup failed");
                None
            },
            Err(_) => {
                debug!(actor_id = %id, "Actor lookup timed out");
                None
            },
        }
    }

    fn submit(&self, record: Result<AuditRecord, AuditError>) {
        match record {
            Ok(record) => self.writer.log_detached(record),
            Err(err) => warn!(error = %err, "Discarding invalid security audit record"),
        }
    }
}
