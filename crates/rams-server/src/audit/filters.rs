//! Query filters and pagination for the audit trail

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::error::AuditError;
use super::models::{AuditAction, AuditLevel, AuditRecord, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};

/// Maximum length of a free-text search term
pub const MAX_SEARCH_LENGTH: usize = 200;

/// Raw query-string parameters accepted by the list and export endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQueryParams {
    pub action: Option<String>,
    pub level: Option<String>,
    pub actor_id: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub search: Option<String>,
    pub source: Option<String>,
    pub ip: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Export only: `csv` (default) or `json`
    pub format: Option<String>,
}

impl AuditQueryParams {
    /// Validate and convert the filter part of the parameters
    pub fn to_filter(&self) -> Result<AuditFilter, AuditError> {
        let action = non_empty(&self.action).map(|a| AuditAction::from(a.to_uppercase()));
        let level = non_empty(&self.level).map(str::parse).transpose()?;
        let actor_id = non_empty(&self.actor_id)
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|_| AuditError::Validation(format!("invalid actor_id '{}'", raw)))
            })
            .transpose()?;

        let start = non_empty(&self.start_date)
            .map(|raw| parse_boundary(raw, Boundary::Start))
            .transpose()?;
        let end = non_empty(&self.end_date)
            .map(|raw| parse_boundary(raw, Boundary::End))
            .transpose()?;
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(AuditError::Validation(
                    "start_date must not be after end_date".to_string(),
                ));
            }
        }

        let search = non_empty(&self.search).map(str::to_string);
        if let Some(term) = &search {
            if term.chars().count() > MAX_SEARCH_LENGTH {
                return Err(AuditError::Validation(format!(
                    "search must be at most {} characters",
                    MAX_SEARCH_LENGTH
                )));
            }
        }

        Ok(AuditFilter {
            action,
            level,
            actor_id,
            entity_type: non_empty(&self.entity_type).map(str::to_string),
            entity_id: non_empty(&self.entity_id).map(str::to_string),
            start,
            end,
            search,
            source: non_empty(&self.source).map(str::to_string),
            ip: non_empty(&self.ip).map(str::to_string),
        })
    }

    /// Validate the pagination part of the parameters
    pub fn to_page(&self) -> Result<PageRequest, AuditError> {
        PageRequest::new(self.page, self.limit)
    }
}

/// Validated filter over audit records; every set field must match
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub level: Option<AuditLevel>,
    pub actor_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub end: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the action tag or of any value in the
    /// details document; keys are not searched
    pub search: Option<String>,
    pub source: Option<String>,
    pub ip: Option<String>,
}

impl AuditFilter {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = &self.action {
            if &record.action != action {
                return false;
            }
        }
        if let Some(level) = self.level {
            if record.level != level {
                return false;
            }
        }
        if self.actor_id.is_some() && record.actor_id != self.actor_id {
            return false;
        }
        if self.entity_type.is_some() && record.entity_type != self.entity_type {
            return false;
        }
        if self.entity_id.is_some() && record.entity_id != self.entity_id {
            return false;
        }
        if let Some(start) = self.start {
            if record.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if record.created_at > end {
                return false;
            }
        }
        if self.source.is_some() && record.metadata.source != self.source {
            return false;
        }
        if self.ip.is_some() && record.metadata.ip != self.ip {
            return false;
        }
        if let Some(term) = &self.search {
            let term = term.to_lowercase();
            let in_action = record.action.as_str().to_lowercase().contains(&term);
            let in_details = record
                .details
                .as_map()
                .values()
                .any(|value| value_contains(value, &term));
            if !in_action && !in_details {
                return false;
            }
        }
        true
    }
}

/// Whether any scalar inside `value` contains the lowercase `term`
fn value_contains(value: &JsonValue, term: &str) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::String(s) => s.to_lowercase().contains(term),
        JsonValue::Bool(b) => b.to_string().contains(term),
        JsonValue::Number(n) => n.to_string().contains(term),
        JsonValue::Array(items) => items.iter().any(|item| value_contains(item, term)),
        JsonValue::Object(map) => map.values().any(|item| value_contains(item, term)),
    }
}

/// A validated page request (1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Result<Self, AuditError> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page < 1 {
            return Err(AuditError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(AuditError::Validation(format!(
                "limit must be between 1 and {}",
                MAX_PAGE_LIMIT
            )));
        }
        if (page - 1).checked_mul(limit).is_none() {
            return Err(AuditError::Validation(format!(
                "page {} is out of range",
                page
            )));
        }
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Boundary {
    Start,
    End,
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date.
///
/// A date-only end boundary covers the whole day.
fn parse_boundary(raw: &str, boundary: Boundary) -> Result<DateTime<Utc>, AuditError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        AuditError::Validation(format!(
            "invalid date '{}', expected RFC 3339 or YYYY-MM-DD",
            raw
        ))
    })?;
    let time = match boundary {
        Boundary::Start => NaiveTime::MIN,
        Boundary::End => NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)
            .ok_or_else(|| AuditError::Validation("invalid end of day".to_string()))?,
    };
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
