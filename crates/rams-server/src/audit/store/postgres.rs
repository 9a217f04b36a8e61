//! PostgreSQL audit store
//!
//! Queries are built at runtime with [`QueryBuilder`] so that every filter
//! value travels as a bind parameter.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use sqlx::{types::Json, FromRow, PgPool, Postgres, QueryBuilder};
use tracing::debug;
use uuid::Uuid;

use super::AuditStore;
use crate::audit::analytics::{sort_buckets, AuditAggregates, CountBucket, DailyActivity};
use crate::audit::details::AuditDetails;
use crate::audit::error::StoreError;
use crate::audit::filters::{AuditFilter, PageRequest};
use crate::audit::models::{AuditAction, AuditLevel, AuditRecord, RecordMetadata};

const SELECT_COLUMNS: &str = r#"
    SELECT id, action, level, actor_id, entity_type, entity_id,
           details, metadata, changes, created_at
    FROM audit_logs
"#;

#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn select(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<AuditRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn grouped<K>(
        &self,
        column: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<(K, i64)>, StoreError>
    where
        K: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Send + Unpin,
    {
        let sql = format!(
            "SELECT {column}, COUNT(*) FROM audit_logs \
             WHERE created_at >= $1 AND created_at <= $2 AND {column} IS NOT NULL \
             GROUP BY {column}"
        );
        Ok(sqlx::query_as::<_, (K, i64)>(&sql)
            .bind(since)
            .bind(until)
            .fetch_all(&self.pool)
            .await?)
    }
}

/// Append the `WHERE` clause for `filter`
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditFilter) {
    qb.push(" WHERE 1=1");

    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.as_str().to_string());
    }
    if let Some(level) = filter.level {
        qb.push(" AND level = ").push_bind(level.as_str());
    }
    if let Some(actor_id) = filter.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id);
    }
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id.clone());
    }
    if let Some(start) = filter.start {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        qb.push(" AND created_at <= ").push_bind(end);
    }
    if let Some(source) = &filter.source {
        qb.push(" AND metadata->>'source' = ").push_bind(source.clone());
    }
    if let Some(ip) = &filter.ip {
        qb.push(" AND metadata->>'ip' = ").push_bind(ip.clone());
    }
    if let Some(term) = &filter.search {
        let pattern = format!("%{}%", escape_like(term));
        // Scalar values anywhere in the document; keys are not searched
        qb.push(" AND (action ILIKE ")
            .push_bind(pattern.clone())
            .push(
                " OR EXISTS (SELECT 1 FROM jsonb_path_query(details, 'strict $.**') AS v \
                 WHERE jsonb_typeof(v) NOT IN ('object', 'array') AND v #>> '{}' ILIKE ",
            )
            .push_bind(pattern)
            .push("))");
    }
}

/// Escape `LIKE` wildcards so the term matches literally
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    action: String,
    level: String,
    actor_id: Option<Uuid>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    details: Json<JsonValue>,
    metadata: Json<JsonValue>,
    changes: Option<Json<JsonValue>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditRecord {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, err: &dyn std::fmt::Display| {
            StoreError::Corrupt(format!("{} of audit record {}: {}", what, row.id, err))
        };

        let level: AuditLevel = row.level.parse().map_err(|e| corrupt("level", &e))?;
        let details = AuditDetails::from_value(row.details.0).map_err(|e| corrupt("details", &e))?;
        let metadata: RecordMetadata =
            serde_json::from_value(row.metadata.0).map_err(|e| corrupt("metadata", &e))?;
        let changes = row
            .changes
            .map(|c| serde_json::from_value(c.0))
            .transpose()
            .map_err(|e| corrupt("changes", &e))?;

        Ok(AuditRecord {
            id: row.id,
            action: AuditAction::from(row.action),
            level,
            actor_id: row.actor_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            details,
            metadata,
            changes,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, level, actor_id, entity_type, entity_id,
                details, metadata, changes, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.action.as_str())
        .bind(record.level.as_str())
        .bind(record.actor_id)
        .bind(&record.entity_type)
        .bind(&record.entity_id)
        .bind(Json(&record.details))
        .bind(Json(&record.metadata))
        .bind(record.changes.as_ref().map(Json))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        debug!(audit_id = %record.id, action = %record.action, "Inserted audit record");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AuditRecord>, StoreError> {
        let sql = format!("{} WHERE id = $1", SELECT_COLUMNS);
        let row: Option<AuditRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AuditRecord::try_from).transpose()
    }

    async fn find(&self, filter: &AuditFilter, page: PageRequest) -> Result<Vec<AuditRecord>, StoreError> {
        self.select(filter, page.limit, page.offset()).await
    }

    async fn find_all(&self, filter: &AuditFilter, limit: i64) -> Result<Vec<AuditRecord>, StoreError> {
        self.select(filter, limit, 0).await
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut qb, filter);
        let (count,): (i64,) = qb.build_query_as().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn aggregate(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<AuditAggregates, StoreError> {
        let (total, failed_logins, admin_actions): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE action = $3),
                   COUNT(*) FILTER (WHERE metadata->>'actor_role' = 'admin')
            FROM audit_logs
            WHERE created_at >= $1 AND created_at <= $2
            "#,
        )
        .bind(since)
        .bind(until)
        .bind(AuditAction::LoginFailed.as_str())
        .fetch_one(&self.pool)
        .await?;

        let mut by_action: Vec<CountBucket> = self
            .grouped::<String>("action", since, until)
            .await?
            .into_iter()
            .map(|(key, count)| CountBucket::new(key, count))
            .collect();
        sort_buckets(&mut by_action);

        let mut by_level: Vec<CountBucket> = self
            .grouped::<String>("level", since, until)
            .await?
            .into_iter()
            .map(|(key, count)| CountBucket::new(key, count))
            .collect();
        by_level.sort_by_key(|b| b.key.parse::<AuditLevel>().ok());

        let mut by_entity_type: Vec<CountBucket> = self
            .grouped::<String>("entity_type", since, until)
            .await?
            .into_iter()
            .map(|(key, count)| CountBucket::new(key, count))
            .collect();
        sort_buckets(&mut by_entity_type);

        let mut by_actor = self.grouped::<Uuid>("actor_id", since, until).await?;
        by_actor.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let daily: Vec<(NaiveDate, i64)> = sqlx::query_as(
            r#"
            SELECT (created_at AT TIME ZONE 'UTC')::date AS day, COUNT(*)
            FROM audit_logs
            WHERE created_at >= $1 AND created_at <= $2
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await?;

        Ok(AuditAggregates {
            total,
            by_action,
            by_level,
            by_entity_type,
            by_actor,
            daily: daily
                .into_iter()
                .map(|(date, count)| DailyActivity { date, count })
                .collect(),
            failed_logins,
            admin_actions,
        })
    }

    async fn failed_logins_since(&self, since: DateTime<Utc>) -> Result<Vec<AuditRecord>, StoreError> {
        let sql = format!(
            "{} WHERE action = $1 AND created_at >= $2 ORDER BY created_at DESC, id DESC",
            SELECT_COLUMNS
        );
        let rows: Vec<AuditRow> = sqlx::query_as(&sql)
            .bind(AuditAction::LoginFailed.as_str())
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1 AND level <> $2")
            .bind(cutoff)
            .bind(AuditLevel::Critical.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
