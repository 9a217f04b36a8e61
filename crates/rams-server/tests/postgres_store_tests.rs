//! PostgreSQL audit store tests
//!
//! Require a running PostgreSQL reachable through `DATABASE_URL`:
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/rams_test cargo test --test postgres_store_tests -- --ignored
//! ```

use chrono::{Duration, Utc};
use rams_server::audit::{
    AuditAction, AuditFilter, AuditLevel, AuditRecord, AuditStore, PageRequest, PgAuditStore,
    RecordMetadata,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

fn project_update(actor: Uuid, minutes_ago: i64) -> AuditRecord {
    let mut metadata = RecordMetadata::new("http");
    metadata.ip = Some("192.168.1.100".to_string());
    metadata.user_agent = Some("Test Agent/1.0".to_string());
    AuditRecord::builder(AuditAction::Update)
        .actor_id(Some(actor))
        .entity("projects", Some("p-1".to_string()))
        .detail("method", "PUT")
        .detail("path", "/api/v1/projects/p-1")
        .detail("status", 200)
        .metadata(metadata)
        .created_at(Utc::now() - Duration::minutes(minutes_ago))
        .build()
        .expect("valid record")
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_insert_and_get(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let store = PgAuditStore::new(pool);
    let record = project_update(Uuid::new_v4(), 0);

    store.insert(&record).await?;
    let loaded = store.get(record.id).await?.expect("record stored");

    assert_eq!(loaded.id, record.id);
    assert_eq!(loaded.action, AuditAction::Update);
    assert_eq!(loaded.actor_id, record.actor_id);
    assert_eq!(loaded.entity_id.as_deref(), Some("p-1"));
    assert_eq!(loaded.details.get("status"), Some(&json!(200)));
    assert_eq!(loaded.metadata.ip.as_deref(), Some("192.168.1.100"));

    assert!(store.get(Uuid::new_v4()).await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_find_filters_and_orders(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let store = PgAuditStore::new(pool);
    let actor = Uuid::new_v4();
    for minutes_ago in [30, 10, 20] {
        store.insert(&project_update(actor, minutes_ago)).await?;
    }
    store.insert(&project_update(Uuid::new_v4(), 5)).await?;

    let filter = AuditFilter {
        actor_id: Some(actor),
        ..AuditFilter::default()
    };
    assert_eq!(store.count(&filter).await?, 3);

    let page = store.find(&filter, PageRequest::new(Some(1), Some(2))?).await?;
    assert_eq!(page.len(), 2);
    assert!(page[0].created_at > page[1].created_at);

    let search = AuditFilter {
        search: Some("projects/P-1".to_string()),
        ..AuditFilter::default()
    };
    assert_eq!(store.count(&search).await?, 4);

    // Keys of the details document are not searched
    let by_key = AuditFilter {
        search: Some("status".to_string()),
        ..AuditFilter::default()
    };
    assert_eq!(store.count(&by_key).await?, 0);
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_delete_older_than_spares_critical(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let store = PgAuditStore::new(pool);
    let now = Utc::now();
    let old = AuditRecord::builder("PROPOSAL_REVIEWED")
        .created_at(now - Duration::days(40))
        .build()?;
    let recent = AuditRecord::builder("PROPOSAL_REVIEWED")
        .created_at(now - Duration::days(20))
        .build()?;
    let critical = AuditRecord::builder("AWARD_REVOKED")
        .level(AuditLevel::Critical)
        .created_at(now - Duration::days(40))
        .build()?;
    for record in [&old, &recent, &critical] {
        store.insert(record).await?;
    }

    let deleted = store.delete_older_than(now - Duration::days(30)).await?;
    assert_eq!(deleted, 1);
    assert!(store.get(old.id).await?.is_none());
    assert!(store.get(recent.id).await?.is_some());
    assert!(store.get(critical.id).await?.is_some());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_aggregate_counts(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
    let store = PgAuditStore::new(pool);
    let actor = Uuid::new_v4();
    store.insert(&project_update(actor, 1)).await?;
    store.insert(&project_update(actor, 2)).await?;
    store
        .insert(
            &AuditRecord::builder(AuditAction::LoginFailed)
                .level(AuditLevel::Warning)
                .detail("identifier", "pi@uni.edu")
                .build()?,
        )
        .await?;

    let now = Utc::now();
    let aggregates = store.aggregate(now - Duration::days(1), now).await?;
    assert_eq!(aggregates.total, 3);
    assert_eq!(aggregates.failed_logins, 1);
    assert_eq!(aggregates.by_actor, vec![(actor, 2)]);
    Ok(())
}
