use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A queued unit of background work with at-least-once delivery.
///
/// The task processor polls rows whose `retry_at` has passed, ordered by
/// `created_at`. Handlers must be idempotent: a crash after the handler runs
/// but before the row is deleted re-delivers the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: String,
    pub body: serde_json::Value,
    pub retry_at: DateTime<Utc>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A task to enqueue.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: String,
    pub body: serde_json::Value,
    /// Earliest time the task should run; `now` for immediate work.
    pub retry_at: DateTime<Utc>,
}

impl NewTask {
    pub fn immediate(kind: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            body,
            retry_at: Utc::now(),
        }
    }
}
