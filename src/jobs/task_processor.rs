use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::RetentionConfig,
    db::DbPool,
    models::Task,
    services::BlobStore,
};

/// Longest backoff between task retries.
const MAX_BACKOFF_SECS: u64 = 60 * 60;

/// A background task handler. At-least-once delivery: handlers must be
/// idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Polls the `tasks` table and dispatches to registered handlers.
///
/// Failures reschedule the task with exponential backoff and record the
/// error on the row; an unknown kind is treated as a failure so a deploy
/// rollback does not silently drop work.
#[derive(Clone)]
pub struct TaskProcessor {
    db: Arc<DbPool>,
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
    config: RetentionConfig,
}

impl TaskProcessor {
    pub fn new(db: Arc<DbPool>, config: RetentionConfig) -> TaskProcessorBuilder {
        TaskProcessorBuilder {
            db,
            handlers: HashMap::new(),
            config,
        }
    }

    pub async fn run_once(&self) -> Result<usize, crate::db::DbError> {
        let due = self
            .db
            .tasks()
            .due(Utc::now(), self.config.task_batch_size)
            .await?;

        let mut processed = 0;
        for task in due {
            match self.dispatch(&task).await {
                Ok(()) => {
                    self.db.tasks().complete(task.id).await?;
                    processed += 1;
                }
                Err(e) => {
                    let backoff_secs = (self.config.task_backoff_secs
                        << task.retry_count.min(16) as u64)
                        .min(MAX_BACKOFF_SECS);
                    let retry_at = Utc::now() + chrono::Duration::seconds(backoff_secs as i64);
                    warn!(
                        task_id = %task.id,
                        kind = %task.kind,
                        retry_count = task.retry_count + 1,
                        error = %e,
                        "Task failed; rescheduling"
                    );
                    self.db
                        .tasks()
                        .fail(task.id, &e.to_string(), retry_at)
                        .await?;
                }
            }
        }
        Ok(processed)
    }

    async fn dispatch(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        match self.handlers.get(&task.kind) {
            Some(handler) => handler.handle(task).await,
            None => Err(format!("no handler registered for task kind '{}'", task.kind).into()),
        }
    }
}

pub struct TaskProcessorBuilder {
    db: Arc<DbPool>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    config: RetentionConfig,
}

impl TaskProcessorBuilder {
    pub fn handler(mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind.into(), handler);
        self
    }

    pub fn build(self) -> TaskProcessor {
        TaskProcessor {
            db: self.db,
            handlers: Arc::new(self.handlers),
            config: self.config,
        }
    }
}

/// Retries a blob delete that failed during eviction. The row was already
/// soft-deleted, so deleting the blob and hard-deleting the row is safe to
/// repeat.
pub struct BlobDeleteHandler {
    db: Arc<DbPool>,
    blob_store: Arc<dyn BlobStore>,
}

impl BlobDeleteHandler {
    pub fn new(db: Arc<DbPool>, blob_store: Arc<dyn BlobStore>) -> Self {
        Self { db, blob_store }
    }
}

#[async_trait]
impl TaskHandler for BlobDeleteHandler {
    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let attachment_id: Uuid = task
            .body
            .get("attachment_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or("task body missing attachment_id")?;

        let orphans = self.db.attachments().find_soft_deleted(i64::MAX).await?;
        let Some(attachment) = orphans.into_iter().find(|a| a.id == attachment_id) else {
            // Already finished elsewhere; done.
            return Ok(());
        };

        if let Some(storage_key) = &attachment.storage_key {
            self.blob_store.delete(storage_key).await?;
        }
        self.db.attachments().finish_delete(attachment_id).await?;
        debug!(attachment_id = %attachment_id, "Blob delete retried successfully");
        Ok(())
    }
}

/// Periodic task polling loop; drains cleanly on cancellation.
pub async fn start_task_worker(processor: TaskProcessor, shutdown: CancellationToken) {
    let interval = processor.config.task_interval();
    info!(interval_secs = interval.as_secs(), "Starting task processor");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Task processor stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match processor.run_once().await {
            Ok(processed) if processed > 0 => debug!(processed, "Task pass complete"),
            Ok(_) => {}
            Err(e) => error!(error = %e, "Task pass failed"),
        }
    }
}
