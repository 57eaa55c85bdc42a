use chrono::{Duration, Utc};

use super::harness;
use crate::{db::DbPool, models::NewTask};

async fn queue_orders_by_created_at_and_respects_retry_at(db: &DbPool) {
    let first = db
        .tasks()
        .enqueue(NewTask::immediate("kind-a", serde_json::json!({"n": 1})))
        .await
        .unwrap();
    let second = db
        .tasks()
        .enqueue(NewTask::immediate("kind-a", serde_json::json!({"n": 2})))
        .await
        .unwrap();
    let future = db
        .tasks()
        .enqueue(NewTask {
            kind: "kind-b".to_string(),
            body: serde_json::json!({}),
            retry_at: Utc::now() + Duration::hours(1),
        })
        .await
        .unwrap();

    let due = db.tasks().due(Utc::now(), 10).await.unwrap();
    let ids: Vec<_> = due.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(!ids.contains(&future.id));

    db.tasks().complete(first.id).await.unwrap();
    let due = db.tasks().due(Utc::now(), 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, second.id);
}

async fn failure_records_error_and_backs_off(db: &DbPool) {
    let task = db
        .tasks()
        .enqueue(NewTask::immediate("flaky", serde_json::json!({})))
        .await
        .unwrap();

    db.tasks()
        .fail(task.id, "boom", Utc::now() + Duration::minutes(5))
        .await
        .unwrap();

    // Not due anymore.
    assert!(db.tasks().due(Utc::now(), 10).await.unwrap().is_empty());

    // Due again after the backoff, with the failure recorded.
    let due = db
        .tasks()
        .due(Utc::now() + Duration::minutes(10), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].retry_count, 1);
    assert_eq!(due[0].last_error.as_deref(), Some("boom"));
}

// ==================== SQLite ====================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn ordering() {
        queue_orders_by_created_at_and_respects_retry_at(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn failure_backoff() {
        failure_records_error_and_backs_off(&harness::sqlite_db().await).await;
    }
}

// ==================== PostgreSQL ====================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn ordering() {
        queue_orders_by_created_at_and_respects_retry_at(&harness::postgres::postgres_db().await)
            .await;
    }
}
