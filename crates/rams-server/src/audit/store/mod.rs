//! Audit record persistence
//!
//! [`AuditStore`] is the contract every backend implements. Records are
//! append-only: there is no update operation, and deletion only happens
//! through retention ([`AuditStore::delete_older_than`]), which never removes
//! CRITICAL records.

mod memory;
mod postgres;

pub use memory::InMemoryAuditStore;
pub use postgres::PgAuditStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::analytics::AuditAggregates;
use super::error::StoreError;
use super::filters::{AuditFilter, PageRequest};
use super::models::AuditRecord;

/// Storage backend for audit records
///
/// Implementations must accept concurrent inserts without global locking and
/// return query results ordered by `created_at DESC, id DESC`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Backend name, used in logs and the health endpoint
    fn name(&self) -> &'static str;

    /// Persist a record
    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Fetch a single record
    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError>;

    /// Fetch one page of records matching `filter`
    async fn find(&self, filter: &AuditFilter, page: PageRequest) -> Result<Vec<AuditRecord>, StoreError>;

    /// Fetch at most `limit` records matching `filter`, in page order
    async fn find_all(&self, filter: &AuditFilter, limit: i64) -> Result<Vec<AuditRecord>, StoreError>;

    /// Count records matching `filter`
    async fn count(&self, filter: &AuditFilter) -> Result<i64, StoreError>;

    /// Grouped counts over `[since, until]`
    async fn aggregate(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<AuditAggregates, StoreError>;

    /// Failed-login records created at or after `since`
    async fn failed_logins_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError>;

    /// Delete non-CRITICAL records created strictly before `cutoff`
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
