//! RAMS Server Library
//!
//! Audit trail and change-detection core of the research-administration
//! backend.
//!
//! # Overview
//!
//! - **Audit capture**: tower middleware recording successful mutations with
//!   field-level diffs of tracked entities
//! - **Security events**: logins, access denials and server errors
//! - **Background writer**: bounded queue persisting records off the request path
//! - **Query surface**: filtered listings, statistics, CSV/JSON export and
//!   retention cleanup under `/api/v1/audit-logs`
//! - **Configuration**: environment-based configuration management
//! - **Middleware**: CORS and request logging
//!
//! ## Commands and queries
//!
//! - **Commands** (POST, PUT, PATCH, DELETE) modify state and are audited
//! - **Queries** (GET) read state and are not audited, except that any 5xx
//!   response is recorded as a server error
//!
//! ## Framework Stack
//!
//! - **Axum**: web framework
//! - **SQLx**: PostgreSQL access and migrations
//! - **Tower**: middleware and service abstractions
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rams_server::audit::{AuditLevel, AuditRecord, AuditWriter, InMemoryAuditStore, WriterConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(InMemoryAuditStore::new());
//!     let (writer, handle) = AuditWriter::spawn(store, WriterConfig::default());
//!
//!     let record = AuditRecord::builder("PROPOSAL_SUBMITTED")
//!         .level(AuditLevel::Info)
//!         .build()?;
//!     writer.log(record).await;
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;

// Re-export commonly used types
pub use error::{AppError, AppResult};
