//! Weak-reference resolution and entity snapshots
//!
//! Audit records point at users and entities without foreign keys. The
//! [`Directory`] resolves those references for display and the
//! [`SnapshotSource`] loads the current state of an entity before it is
//! modified. Both are best-effort: callers treat errors as "unknown".

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::StoreError;

/// Entity types with a display column, as `(entity_type, table, column)`
pub const DEFAULT_ENTITY_TITLES: &[(&str, &str, &str)] = &[
    ("projects", "projects", "title"),
    ("proposals", "proposals", "title"),
    ("grants", "grants", "title"),
    ("awards", "awards", "title"),
    ("publications", "publications", "title"),
    ("reports", "reports", "title"),
    ("users", "users", "name"),
    ("departments", "departments", "name"),
];

/// Resolves actor and entity references
#[async_trait]
pub trait Directory: Send + Sync {
    async fn actor_exists(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Display names of the given actors; unknown ids are absent from the map
    async fn actor_names(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>, StoreError>;

    async fn entity_title(&self, entity_type: &str, entity_id: &str) -> Result<Option<String>, StoreError>;
}

/// Loads the current JSON state of an entity
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self, entity_type: &str, entity_id: &str) -> Result<Option<JsonValue>, StoreError>;
}

/// Whether `name` is safe to splice into SQL as an identifier
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// Fixed directory, built once
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    actors: HashMap<Uuid, String>,
    titles: HashMap<(String, String), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, id: Uuid, name: impl Into<String>) -> Self {
        self.actors.insert(id, name.into());
        self
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        self.titles
            .insert((entity_type.into(), entity_id.into()), title.into());
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn actor_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.actors.contains_key(&id))
    }

    async fn actor_names(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.actors.get(id).map(|name| (*id, name.clone())))
            .collect())
    }

    async fn entity_title(&self, entity_type: &str, entity_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .titles
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }
}

/// Mutable snapshot table, keyed by `(entity_type, entity_id)`
#[derive(Debug, Default)]
pub struct InMemorySnapshots {
    entities: RwLock<HashMap<(String, String), JsonValue>>,
}

impl InMemorySnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, entity_type: &str, entity_id: &str, state: JsonValue) {
        self.entities
            .write()
            .await
            .insert((entity_type.to_string(), entity_id.to_string()), state);
    }

    pub async fn remove(&self, entity_type: &str, entity_id: &str) {
        self.entities
            .write()
            .await
            .remove(&(entity_type.to_string(), entity_id.to_string()));
    }
}

#[async_trait]
impl SnapshotSource for InMemorySnapshots {
    async fn snapshot(&self, entity_type: &str, entity_id: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self
            .entities
            .read()
            .await
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }
}

// ============================================================================
// PostgreSQL implementations
// ============================================================================

/// Directory backed by the application's own tables
#[derive(Debug, Clone)]
pub struct PgDirectory {
    pool: PgPool,
    users_table: String,
    name_column: String,
    titles: HashMap<String, (String, String)>,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            users_table: "users".to_string(),
            name_column: "name".to_string(),
            titles: DEFAULT_ENTITY_TITLES
                .iter()
                .map(|(entity, table, column)| {
                    (entity.to_string(), (table.to_string(), column.to_string()))
                })
                .collect(),
        }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn actor_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            self.users_table
        );
        let (exists,): (bool,) = sqlx::query_as(&sql).bind(id).fetch_one(&self.pool).await?;
        Ok(exists)
    }

    async fn actor_names(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT id, {}::text FROM {} WHERE id = ANY($1)",
            self.name_column, self.users_table
        );
        let rows: Vec<(Uuid, Option<String>)> = sqlx::query_as(&sql)
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, name)| name.map(|name| (id, name)))
            .collect())
    }

    async fn entity_title(&self, entity_type: &str, entity_id: &str) -> Result<Option<String>, StoreError> {
        let Some((table, column)) = self.titles.get(entity_type) else {
            return Ok(None);
        };
        let sql = format!("SELECT {}::text FROM {} WHERE id::text = $1", column, table);
        let row: Option<(Option<String>,)> = sqlx::query_as(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(title,)| title))
    }
}

/// Loads `to_jsonb(row)` from the table named after the entity type
#[derive(Debug, Clone)]
pub struct PgSnapshotSource {
    pool: PgPool,
}

impl PgSnapshotSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotSource for PgSnapshotSource {
    async fn snapshot(&self, entity_type: &str, entity_id: &str) -> Result<Option<JsonValue>, StoreError> {
        if !is_sql_identifier(entity_type) {
            return Err(StoreError::Unavailable(format!(
                "entity type '{}' is not a table name",
                entity_type
            )));
        }
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.id::text = $1",
            entity_type
        );
        let row: Option<(JsonValue,)> = sqlx::query_as(&sql)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(snapshot,)| snapshot))
    }
}
