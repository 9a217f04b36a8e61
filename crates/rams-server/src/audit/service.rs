//! Query, analytics, export and retention operations over the audit trail
//!
//! Every operation checks the caller's role before touching the store.
//! Reads (`list`, `get_by_id`) need the admin or auditor role; `stats`,
//! `export` and `cleanup` need admin.

use chrono::{Duration, Utc};
use rams_common::{Actor, Role};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::analytics::{
    detect_suspicious_ips, top_n, AuditStats, SecurityEvents, UserActivity,
    DEFAULT_FAILED_LOGIN_THRESHOLD, DEFAULT_SECURITY_LOOKBACK_HOURS, DEFAULT_STATS_DAYS,
    MAX_STATS_DAYS, TOP_N,
};
use super::directory::Directory;
use super::error::AuditError;
use super::export::{render, ExportFile, ExportFormat};
use super::filters::AuditQueryParams;
use super::models::{AuditRecord, AuditRecordView, EXPORT_ROW_CAP};
use super::store::AuditStore;
use crate::api::pagination::PaginationMetadata;

/// Tunables of the statistics endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSettings {
    /// Failed attempts from one address that make it suspicious
    pub failed_login_threshold: usize,
    /// Lookback of the failed-login heuristic, capped by the stats window
    pub security_lookback_hours: i64,
    pub top_n: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            failed_login_threshold: DEFAULT_FAILED_LOGIN_THRESHOLD,
            security_lookback_hours: DEFAULT_SECURITY_LOOKBACK_HOURS,
            top_n: TOP_N,
        }
    }
}

/// One page of the audit trail
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub items: Vec<AuditRecord>,
    pub pagination: PaginationMetadata,
}

#[derive(Clone)]
pub struct AuditService {
    store: Arc<dyn AuditStore>,
    directory: Option<Arc<dyn Directory>>,
    settings: AnalyticsSettings,
}

impl AuditService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            directory: None,
            settings: AnalyticsSettings::default(),
        }
    }

    /// Resolve actor names and entity titles through `directory`
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_settings(mut self, settings: AnalyticsSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// List records matching the query parameters, newest first
    #[tracing::instrument(skip(self, caller, params), fields(caller = ?caller.map(|a| a.id)))]
    pub async fn list(
        &self,
        caller: Option<&Actor>,
        params: &AuditQueryParams,
    ) -> Result<AuditPage, AuditError> {
        authorize_read(caller)?;
        let filter = params.to_filter()?;
        let page = params.to_page()?;

        let total = self.store.count(&filter).await?;
        let items = self.store.find(&filter, page).await?;

        debug!(total, returned = items.len(), page = page.page, "Listed audit records");
        Ok(AuditPage {
            items,
            pagination: PaginationMetadata::new(page.page, page.limit, total),
        })
    }

    /// A single record with its actor name and entity title resolved
    #[tracing::instrument(skip(self, caller), fields(caller = ?caller.map(|a| a.id)))]
    pub async fn get_by_id(
        &self,
        caller: Option<&Actor>,
        id: Uuid,
    ) -> Result<AuditRecordView, AuditError> {
        authorize_read(caller)?;
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("audit record {} not found", id)))?;

        let actor_name = match record.actor_id {
            Some(actor_id) => self.actor_names(&[actor_id]).await.remove(&actor_id),
            None => None,
        };
        let entity_title = match (&self.directory, &record.entity_type, &record.entity_id) {
            (Some(directory), Some(entity_type), Some(entity_id)) => {
                match directory.entity_title(entity_type, entity_id).await {
                    Ok(title) => title,
                    Err(e) => {
                        warn!(entity_type, entity_id, error = %e, "Failed to resolve entity title");
                        None
                    },
                }
            },
            _ => None,
        };

        Ok(AuditRecordView {
            record,
            actor_name,
            entity_title,
        })
    }

    /// Aggregated statistics over the last `days` days (default 30)
    #[tracing::instrument(skip(self, caller), fields(caller = ?caller.map(|a| a.id)))]
    pub async fn stats(&self, caller: Option<&Actor>, days: Option<i64>) -> Result<AuditStats, AuditError> {
        authorize_admin(caller)?;
        let days = days.unwrap_or(DEFAULT_STATS_DAYS);
        if !(1..=MAX_STATS_DAYS).contains(&days) {
            return Err(AuditError::Validation(format!(
                "days must be between 1 and {}",
                MAX_STATS_DAYS
            )));
        }

        let until = Utc::now();
        let since = until - Duration::days(days);
        let aggregates = self.store.aggregate(since, until).await?;

        let lookback = Duration::hours(self.settings.security_lookback_hours).min(Duration::days(days));
        let failed = self.store.failed_logins_since(until - lookback).await?;
        let suspicious_ips = detect_suspicious_ips(&failed, self.settings.failed_login_threshold);

        let top_actors: Vec<(Uuid, i64)> = aggregates
            .by_actor
            .iter()
            .take(self.settings.top_n)
            .copied()
            .collect();
        let ids: Vec<Uuid> = top_actors.iter().map(|(id, _)| *id).collect();
        let names = self.actor_names(&ids).await;
        let by_user = top_actors
            .into_iter()
            .map(|(actor_id, count)| UserActivity {
                actor_id,
                name: names.get(&actor_id).cloned(),
                count,
            })
            .collect();

        Ok(AuditStats {
            window_days: days,
            since,
            until,
            total_logs: aggregates.total,
            by_action: top_n(aggregates.by_action, self.settings.top_n),
            by_level: aggregates.by_level,
            by_entity_type: aggregates.by_entity_type,
            by_user,
            daily_activity: aggregates.daily,
            security_events: SecurityEvents {
                failed_logins: aggregates.failed_logins,
                suspicious_activity_count: i64::try_from(suspicious_ips.len()).unwrap_or(i64::MAX),
                admin_action_count: aggregates.admin_actions,
                suspicious_ips,
            },
        })
    }

    /// Export matching records, capped at [`EXPORT_ROW_CAP`], in list order
    #[tracing::instrument(skip(self, caller, params), fields(caller = ?caller.map(|a| a.id)))]
    pub async fn export(
        &self,
        caller: Option<&Actor>,
        params: &AuditQueryParams,
    ) -> Result<ExportFile, AuditError> {
        authorize_admin(caller)?;
        let format = match params.format.as_deref() {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => ExportFormat::default(),
        };
        let filter = params.to_filter()?;

        let records = self.store.find_all(&filter, EXPORT_ROW_CAP).await?;
        let mut ids: Vec<Uuid> = records.iter().filter_map(|r| r.actor_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let names = self.actor_names(&ids).await;

        let file = render(&records, &names, format, Utc::now())?;
        info!(rows = file.rows, format = format.extension(), "Exported audit records");
        Ok(file)
    }

    /// Delete non-CRITICAL records older than `days_to_keep` days
    #[tracing::instrument(skip(self, caller), fields(caller = ?caller.map(|a| a.id)))]
    pub async fn cleanup(&self, caller: Option<&Actor>, days_to_keep: i64) -> Result<u64, AuditError> {
        authorize_admin(caller)?;
        self.purge_expired(days_to_keep).await
    }

    /// Retention without an interactive caller, used by the scheduled task
    pub async fn purge_expired(&self, days_to_keep: i64) -> Result<u64, AuditError> {
        if days_to_keep < 1 {
            return Err(AuditError::Validation(
                "days_to_keep must be at least 1".to_string(),
            ));
        }
        let cutoff = Duration::try_days(days_to_keep)
            .and_then(|keep| Utc::now().checked_sub_signed(keep))
            .ok_or_else(|| {
                AuditError::Validation(format!("days_to_keep {} is out of range", days_to_keep))
            })?;
        let deleted = self.store.delete_older_than(cutoff).await?;
        info!(deleted, days_to_keep, cutoff = %cutoff, "Deleted expired audit records");
        Ok(deleted)
    }

    async fn actor_names(&self, ids: &[Uuid]) -> HashMap<Uuid, String> {
        let Some(directory) = &self.directory else {
            return HashMap::new();
        };
        if ids.is_empty() {
            return HashMap::new();
        }
        match directory.actor_names(ids).await {
            Ok(names) => names,
            Err(e) => {
                warn!(error = %e, "Failed to resolve actor names");
                HashMap::new()
            },
        }
    }
}

/// Admin or auditor
pub fn authorize_read(caller: Option<&Actor>) -> Result<Actor, AuditError> {
    match caller {
        Some(actor) if actor.role.can_read_audit() => Ok(*actor),
        Some(actor) => Err(AuditError::Authorization(format!(
            "role '{}' may not read the audit trail",
            actor.role
        ))),
        None => Err(AuditError::Authorization("authentication required".to_string())),
    }
}

/// Admin only
pub fn authorize_admin(caller: Option<&Actor>) -> Result<Actor, AuditError> {
    match caller {
        Some(actor) if actor.role.is_privileged() => Ok(*actor),
        Some(actor) => Err(AuditError::Authorization(format!(
            "role '{}' may not manage the audit trail",
            actor.role
        ))),
        None => Err(AuditError::Authorization("authentication required".to_string())),
    }
}

/// Role required by an operation, for denial records
pub fn required_role(operation: &str) -> Role {
    match operation {
        "list" | "get" => Role::Auditor,
        _ => Role::Admin,
    }
}
