//! Audit trail and change detection
//!
//! This module records an append-only trail of what happened in the system:
//! mutations observed on the HTTP surface, authentication and authorization
//! events, and unhandled server errors.
//!
//! # Architecture
//!
//! - **Capture**: [`AuditLayer`] observes successful POST/PUT/PATCH/DELETE
//!   requests, diffs tracked entities against their previous state and hands
//!   the resulting record to the writer. Reads are not audited.
//! - **Security events**: [`SecurityCapture`] records logins, access denials
//!   and server errors through the same writer.
//! - **Write path**: [`AuditWriter`] is a bounded queue in front of an
//!   [`AuditStore`]; request paths never wait for persistence.
//! - **Query surface**: [`AuditService`] answers filtered listings,
//!   statistics, exports and retention cleanup behind role checks.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::Router;
//! use rams_server::audit::{AuditLayer, AuditWriter, CaptureConfig, InMemoryAuditStore, WriterConfig};
//!
//! # async fn example() {
//! let store = Arc::new(InMemoryAuditStore::new());
//! let (writer, handle) = AuditWriter::spawn(store, WriterConfig::default());
//! let app: Router = Router::new().layer(AuditLayer::new(writer, CaptureConfig::default()));
//! // ... serve `app` ...
//! handle.shutdown().await;
//! # }
//! ```
//!
//! # Example: Recording a domain event
//!
//! ```no_run
//! use rams_server::audit::{AuditLevel, AuditRecord, AuditWriter};
//! use uuid::Uuid;
//!
//! # fn example(writer: &AuditWriter, actor: Uuid) -> Result<(), rams_server::audit::AuditError> {
//! let record = AuditRecord::builder("GRANT_AWARDED")
//!     .level(AuditLevel::Info)
//!     .actor_id(Some(actor))
//!     .entity("grants", Some("g-17".to_string()))
//!     .detail("amount", 250_000)
//!     .build()?;
//! writer.log_detached(record);
//! # Ok(())
//! # }
//! ```

pub mod analytics;
pub mod capture;
pub mod context;
pub mod details;
pub mod diff;
pub mod directory;
pub mod error;
pub mod export;
pub mod filters;
pub mod middleware;
pub mod models;
pub mod retention;
pub mod routes;
pub mod service;
pub mod store;
pub mod writer;


pub use capture::SecurityCapture;
pub use context::{CallerIdentity, RequestContext};
pub use details::AuditDetails;
pub use diff::{compute_changes, diff_snapshots, ChangeSet};
pub use directory::{
    Directory, InMemorySnapshots, PgDirectory, PgSnapshotSource, SnapshotSource, StaticDirectory,
};
pub use error::{AuditError, StoreError};
pub use export::{ExportFile, ExportFormat};
pub use filters::{AuditFilter, AuditQueryParams, PageRequest};
pub use middleware::{AuditLayer, CaptureConfig};
pub use models::{AuditAction, AuditLevel, AuditRecord, AuditRecordView, RecordMetadata};
pub use retention::{spawn_retention, RetentionConfig};
pub use routes::{audit_routes, AuditState};
pub use service::{AnalyticsSettings, AuditPage, AuditService};
pub use store::{AuditStore, InMemoryAuditStore, PgAuditStore};
pub use writer::{AuditWorkerHandle, AuditWriter, QueueOverflowPolicy, WriterConfig, WriterStatsSnapshot};
