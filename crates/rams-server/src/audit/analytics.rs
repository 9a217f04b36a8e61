//! Audit analytics
//!
//! Grouped counts over a time window and the failed-login heuristic used to
//! flag suspicious client addresses.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use super::models::{AuditAction, AuditRecord};
use rams_common::Role;

/// Default statistics window in days
pub const DEFAULT_STATS_DAYS: i64 = 30;

/// Maximum statistics window in days
pub const MAX_STATS_DAYS: i64 = 365;

/// Number of entries kept in the top-N groupings
pub const TOP_N: usize = 10;

/// Failed attempts from one address that make it suspicious
pub const DEFAULT_FAILED_LOGIN_THRESHOLD: usize = 5;

/// Default lookback of the security heuristic in hours
pub const DEFAULT_SECURITY_LOOKBACK_HOURS: i64 = 24;

/// A grouping key with its record count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountBucket {
    pub key: String,
    pub count: i64,
}

impl CountBucket {
    pub fn new(key: impl Into<String>, count: i64) -> Self {
        Self {
            key: key.into(),
            count,
        }
    }
}

/// Record count of one acting user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub actor_id: Uuid,
    pub name: Option<String>,
    pub count: i64,
}

/// Record count of one UTC calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyActivity {
    pub date: NaiveDate,
    pub count: i64,
}

/// Raw grouped counts returned by a store for a time window
///
/// Groupings are complete; truncation to the top entries happens in the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditAggregates {
    pub total: i64,
    pub by_action: Vec<CountBucket>,
    pub by_level: Vec<CountBucket>,
    pub by_entity_type: Vec<CountBucket>,
    pub by_actor: Vec<(Uuid, i64)>,
    /// Ascending by date
    pub daily: Vec<DailyActivity>,
    pub failed_logins: i64,
    /// Records whose actor acted with the admin role
    pub admin_actions: i64,
}

/// A client address with repeated failed logins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousIp {
    pub ip: String,
    pub attempts: i64,
    pub last_attempt: DateTime<Utc>,
    /// Distinct attempted identifiers, sorted
    pub identifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvents {
    pub failed_logins: i64,
    pub suspicious_activity_count: i64,
    pub admin_action_count: i64,
    pub suspicious_ips: Vec<SuspiciousIp>,
}

/// Statistics response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub window_days: i64,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub total_logs: i64,
    pub by_action: Vec<CountBucket>,
    pub by_level: Vec<CountBucket>,
    pub by_entity_type: Vec<CountBucket>,
    pub by_user: Vec<UserActivity>,
    pub daily_activity: Vec<DailyActivity>,
    pub security_events: SecurityEvents,
}

/// Sort buckets by count descending, then key, and keep the first `n`
pub fn top_n(mut buckets: Vec<CountBucket>, n: usize) -> Vec<CountBucket> {
    sort_buckets(&mut buckets);
    buckets.truncate(n);
    buckets
}

pub(crate) fn sort_buckets(buckets: &mut [CountBucket]) {
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
}

/// Group records of `[since, until]` in memory
pub fn aggregate_records<'a, I>(records: I, since: DateTime<Utc>, until: DateTime<Utc>) -> AuditAggregates
where
    I: IntoIterator<Item = &'a AuditRecord>,
{
    let mut aggregates = AuditAggregates::default();
    let mut by_action: HashMap<String, i64> = HashMap::new();
    let mut by_level: BTreeMap<_, i64> = BTreeMap::new();
    let mut by_entity_type: HashMap<String, i64> = HashMap::new();
    let mut by_actor: HashMap<Uuid, i64> = HashMap::new();
    let mut daily: BTreeMap<NaiveDate, i64> = BTreeMap::new();

    for record in records
        .into_iter()
        .filter(|r| r.created_at >= since && r.created_at <= until)
    {
        aggregates.total += 1;
        *by_action.entry(record.action.as_str().to_string()).or_default() += 1;
        *by_level.entry(record.level).or_default() += 1;
        if let Some(entity_type) = &record.entity_type {
            *by_entity_type.entry(entity_type.clone()).or_default() += 1;
        }
        if let Some(actor_id) = record.actor_id {
            *by_actor.entry(actor_id).or_default() += 1;
        }
        *daily.entry(record.created_at.date_naive()).or_default() += 1;

        if record.action == AuditAction::LoginFailed {
            aggregates.failed_logins += 1;
        }
        if record.metadata.actor_role == Some(Role::Admin) {
            aggregates.admin_actions += 1;
        }
    }

    aggregates.by_action = by_action
        .into_iter()
        .map(|(key, count)| CountBucket::new(key, count))
        .collect();
    sort_buckets(&mut aggregates.by_action);
    aggregates.by_level = by_level
        .into_iter()
        .map(|(level, count)| CountBucket::new(level.as_str(), count))
        .collect();
    aggregates.by_entity_type = by_entity_type
        .into_iter()
        .map(|(key, count)| CountBucket::new(key, count))
        .collect();
    sort_buckets(&mut aggregates.by_entity_type);
    aggregates.by_actor = by_actor.into_iter().collect();
    aggregates
        .by_actor
        .sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    aggregates.daily = daily
        .into_iter()
        .map(|(date, count)| DailyActivity { date, count })
        .collect();

    aggregates
}

/// Group failed-login records by client address and keep the addresses with
/// at least `threshold` attempts.
///
/// Records without an address are ignored. Results are sorted by attempts
/// descending, then address.
pub fn detect_suspicious_ips(failed_logins: &[AuditRecord], threshold: usize) -> Vec<SuspiciousIp> {
    struct Group {
        attempts: i64,
        last_attempt: DateTime<Utc>,
        identifiers: BTreeSet<String>,
    }

    let mut groups: HashMap<&str, Group> = HashMap::new();
    for record in failed_logins {
        let Some(ip) = record.metadata.ip.as_deref() else {
            continue;
        };
        let group = groups.entry(ip).or_insert_with(|| Group {
            attempts: 0,
            last_attempt: record.created_at,
            identifiers: BTreeSet::new(),
        });
        group.attempts += 1;
        group.last_attempt = group.last_attempt.max(record.created_at);
        if let Some(identifier) = record.details.get("identifier").and_then(|v| v.as_str()) {
            group.identifiers.insert(identifier.to_string());
        }
    }

    let threshold = i64::try_from(threshold).unwrap_or(i64::MAX);
    let mut suspicious: Vec<SuspiciousIp> = groups
        .into_iter()
        .filter(|(_, group)| group.attempts >= threshold)
        .map(|(ip, group)| SuspiciousIp {
            ip: ip.to_string(),
            attempts: group.attempts,
            last_attempt: group.last_attempt,
            identifiers: group.identifiers.into_iter().collect(),
        })
        .collect();
    suspicious.sort_by(|a, b| b.attempts.cmp(&a.attempts).then_with(|| a.ip.cmp(&b.ip)));
    suspicious
}
