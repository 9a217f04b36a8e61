//! Audit data models

use chrono::{DateTime, Utc};
use rams_common::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::details::AuditDetails;
use super::diff::ChangeSet;
use super::error::AuditError;

// ============================================================================
// Audit Query Constants
// ============================================================================

/// Default number of audit records returned per page
pub const DEFAULT_PAGE_LIMIT: i64 = 20;

/// Maximum number of audit records that can be returned in a single page
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Hard cap on the number of records a single export may contain
pub const EXPORT_ROW_CAP: i64 = 10_000;

/// Severity of an audit record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    #[default]
    Info,
    Warning,
    Error,
    /// Never removed by retention cleanup
    Critical,
}

impl AuditLevel {
    pub const ALL: [AuditLevel; 4] = [
        AuditLevel::Info,
        AuditLevel::Warning,
        AuditLevel::Error,
        AuditLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::str::FromStr for AuditLevel {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(AuditError::Validation(format!("unknown level '{}'", other))),
        }
    }
}

impl std::fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Action tag of an audit record
///
/// Well-known tags get their own variant; domain code may record any other
/// tag through [`AuditAction::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    LoginSuccess,
    LoginFailed,
    Logout,
    AccessDenied,
    ServerError,
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::LoginSuccess => "AUTH_LOGIN_SUCCESS",
            Self::LoginFailed => "AUTH_LOGIN_FAILED",
            Self::Logout => "AUTH_LOGOUT",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::ServerError => "SERVER_ERROR",
            Self::Custom(tag) => tag,
        }
    }

    /// Keys that `details` must contain for this action
    pub fn required_detail_keys(&self) -> &'static [&'static str] {
        match self {
            Self::Create | Self::Update | Self::Delete => &["method", "path", "status"],
            Self::LoginSuccess | Self::LoginFailed => &["identifier"],
            Self::AccessDenied => &["operation"],
            Self::ServerError => &["message"],
            Self::Logout | Self::Custom(_) => &[],
        }
    }
}

impl From<String> for AuditAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "CREATE" => Self::Create,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "AUTH_LOGIN_SUCCESS" => Self::LoginSuccess,
            "AUTH_LOGIN_FAILED" => Self::LoginFailed,
            "AUTH_LOGOUT" => Self::Logout,
            "ACCESS_DENIED" => Self::AccessDenied,
            "SERVER_ERROR" => Self::ServerError,
            _ => Self::Custom(tag),
        }
    }
}

impl From<&str> for AuditAction {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        match action {
            AuditAction::Custom(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request context stored alongside a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Origin of the record, e.g. `http`, `security`, `system`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_role: Option<Role>,
    pub timestamp: DateTime<Utc>,
}

impl RecordMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            ip: None,
            user_agent: None,
            source: Some(source.into()),
            request_id: None,
            session_id: None,
            actor_role: None,
            timestamp: Utc::now(),
        }
    }
}

impl Default for RecordMetadata {
    fn default() -> Self {
        Self::new("system")
    }
}

/// An immutable entry of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub level: AuditLevel,
    /// Weak reference to the acting user; `None` for system actions
    pub actor_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: AuditDetails,
    pub metadata: RecordMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<ChangeSet>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Start building a record for `action`
    pub fn builder(action: impl Into<AuditAction>) -> AuditRecordBuilder {
        AuditRecordBuilder::new(action.into())
    }
}

/// A record enriched with best-effort lookups of its weak references
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecordView {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub actor_name: Option<String>,
    pub entity_title: Option<String>,
}

/// Builder for [`AuditRecord`]
///
/// `build` assigns the id, stamps `created_at` unless one was supplied, and
/// validates the details document against the action.
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
    action: AuditAction,
    level: AuditLevel,
    actor_id: Option<Uuid>,
    entity_type: Option<String>,
    entity_id: Option<String>,
    details: AuditDetails,
    metadata: RecordMetadata,
    changes: Option<ChangeSet>,
    created_at: Option<DateTime<Utc>>,
}

impl AuditRecordBuilder {
    fn new(action: AuditAction) -> Self {
        Self {
            action,
            level: AuditLevel::Info,
            actor_id: None,
            entity_type: None,
            entity_id: None,
            details: AuditDetails::new(),
            metadata: RecordMetadata::default(),
            changes: None,
            created_at: None,
        }
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn actor_id(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }

    pub fn entity(mut self, entity_type: impl Into<String>, entity_id: Option<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = entity_id;
        self
    }

    pub fn details(mut self, details: AuditDetails) -> Self {
        self.details = details;
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.details.insert(key, value);
        self
    }

    pub fn metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attach a change-set; empty change-sets are dropped
    pub fn changes(mut self, changes: Option<ChangeSet>) -> Self {
        self.changes = changes.filter(|c| !c.is_empty());
        self
    }

    /// Override the creation time, e.g. when importing historical events
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> Result<AuditRecord, AuditError> {
        if self.action.as_str().trim().is_empty() {
            return Err(AuditError::Validation("action must not be empty".to_string()));
        }
        if let Some(entity_type) = &self.entity_type {
            if entity_type.trim().is_empty() {
                return Err(AuditError::Validation(
                    "entity_type must not be empty when set".to_string(),
                ));
            }
        }
        self.details.validate_for(&self.action)?;

        Ok(AuditRecord {
            id: Uuid::new_v4(),
            action: self.action,
            level: self.level,
            actor_id: self.actor_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            details: self.details,
            metadata: self.metadata,
            changes: self.changes,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_action_as_str() {
        assert_eq!(AuditAction::Create.as_str(), "CREATE");
        assert_eq!(AuditAction::LoginFailed.as_str(), "AUTH_LOGIN_FAILED");
        assert_eq!(AuditAction::Custom("GRANT_AWARDED".into()).as_str(), "GRANT_AWARDED");
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&AuditAction::Update).unwrap();
        assert_eq!(json, r#""UPDATE""#);

        let action: AuditAction = serde_json::from_str(r#""AUTH_LOGIN_FAILED""#).unwrap();
        assert_eq!(action, AuditAction::LoginFailed);

        let custom: AuditAction = serde_json::from_str(r#""PROPOSAL_SUBMITTED""#).unwrap();
        assert_eq!(custom, AuditAction::Custom("PROPOSAL_SUBMITTED".to_string()));
    }

    #[test]
    fn test_level_parsing_and_order() {
        assert_eq!("critical".parse::<AuditLevel>().unwrap(), AuditLevel::Critical);
        assert_eq!("warn".parse::<AuditLevel>().unwrap(), AuditLevel::Warning);
        assert!(matches!(
            "fatal".parse::<AuditLevel>(),
            Err(AuditError::Validation(_))
        ));
        assert!(AuditLevel::Critical > AuditLevel::Error);
        assert_eq!(serde_json::to_string(&AuditLevel::Warning).unwrap(), r#""WARNING""#);
    }

    #[test]
    fn test_builder_validates_required_details() {
        let err = AuditRecord::builder(AuditAction::LoginFailed)
            .level(AuditLevel::Warning)
            .build()
            .unwrap_err();
        assert!(matches!(err, AuditError::Validation(_)));

        let record = AuditRecord::builder(AuditAction::LoginFailed)
            .level(AuditLevel::Warning)
            .detail("identifier", "pi@university.edu")
            .build()
            .unwrap();
        assert_eq!(record.level, AuditLevel::Warning);
        assert_eq!(record.details.get("identifier"), Some(&json!("pi@university.edu")));
    }

    #[test]
    fn test_builder_drops_empty_change_set() {
        let record = AuditRecord::builder("PROJECT_ARCHIVED")
            .entity("projects", Some("p-1".to_string()))
            .changes(Some(ChangeSet::default()))
            .build()
            .unwrap();
        assert!(record.changes.is_none());
        assert_eq!(record.entity_type.as_deref(), Some("projects"));
    }

    #[test]
    fn test_record_serializes_without_empty_changes() {
        let record = AuditRecord::builder("PROJECT_ARCHIVED").build().unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("changes").is_none());
        assert_eq!(value["action"], json!("PROJECT_ARCHIVED"));
        assert_eq!(value["metadata"]["source"], json!("system"));
    }
}
