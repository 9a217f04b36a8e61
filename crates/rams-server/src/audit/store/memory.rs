//! In-memory audit store
//!
//! Used by tests and single-process deployments without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::AuditStore;
use crate::audit::analytics::{aggregate_records, AuditAggregates};
use crate::audit::error::StoreError;
use crate::audit::filters::{AuditFilter, PageRequest};
use crate::audit::models::{AuditAction, AuditLevel, AuditRecord};

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn matching(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let records = self.records.read().await;
        let mut matched: Vec<AuditRecord> =
            records.iter().filter(|r| filter.matches(r)).cloned().collect();
        matched.sort_by(newest_first);
        matched
    }
}

fn newest_first(a: &AuditRecord, b: &AuditRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn to_usize(value: i64) -> usize {
    usize::try_from(value.max(0)).unwrap_or(usize::MAX)
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find(&self, filter: &AuditFilter, page: PageRequest) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .matching(filter)
            .await
            .into_iter()
            .skip(to_usize(page.offset()))
            .take(to_usize(page.limit))
            .collect())
    }

    async fn find_all(&self, filter: &AuditFilter, limit: i64) -> Result<Vec<AuditRecord>, StoreError> {
        Ok(self
            .matching(filter)
            .await
            .into_iter()
            .take(to_usize(limit))
            .collect())
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64, StoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).count() as i64)
    }

    async fn aggregate(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<AuditAggregates, StoreError> {
        let records = self.records.read().await;
        Ok(aggregate_records(records.iter(), since, until))
    }

    async fn failed_logins_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().await;
        let mut failed: Vec<AuditRecord> = records
            .iter()
            .filter(|r| r.action == AuditAction::LoginFailed && r.created_at >= since)
            .cloned()
            .collect();
        failed.sort_by(newest_first);
        Ok(failed)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.level == AuditLevel::Critical || r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
