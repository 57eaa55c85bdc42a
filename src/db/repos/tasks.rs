use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{NewTask, Task},
};

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> DbResult<Task>;

    /// Tasks whose `retry_at` has passed, ordered by `created_at`.
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Task>>;

    /// Remove a completed task.
    async fn complete(&self, id: Uuid) -> DbResult<()>;

    /// Record a failure: bump `retry_count`, store the error, and push
    /// `retry_at` into the future.
    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()>;
}
