use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    config::RetentionConfig,
    db::{DbPool, RefcountDecision},
    models::NewTask,
    observability::metrics,
    services::{BlobStore, VectorStore},
};

/// Results from a single eviction pass.
#[derive(Debug, Default, Clone, Serialize)]
pub struct EvictionRunResult {
    pub groups_evicted: u64,
    pub entries_deleted: u64,
    pub conversations_deleted: u64,
    pub memberships_deleted: u64,
    pub attachments_deleted: u64,
    pub blobs_deleted: u64,
}

/// Progress event for the admin "evict now" stream.
#[derive(Debug, Clone, Serialize)]
pub struct EvictionProgress {
    pub run_id: Uuid,
    pub groups_evicted: u64,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<EvictionRunResult>,
}

struct ActiveRun {
    id: Uuid,
    events: broadcast::Sender<EvictionProgress>,
}

/// Hard-deletes groups whose soft-delete grace period has expired.
///
/// Per group, deletion order is: vectors, then attachments (with blob
/// reference counting), then entries / memberships / conversations / the
/// group row in one transaction.
#[derive(Clone)]
pub struct EvictionService {
    db: Arc<DbPool>,
    blob_store: Arc<dyn BlobStore>,
    vector_store: Option<Arc<dyn VectorStore>>,
    config: RetentionConfig,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl EvictionService {
    pub fn new(
        db: Arc<DbPool>,
        blob_store: Arc<dyn BlobStore>,
        vector_store: Option<Arc<dyn VectorStore>>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            db,
            blob_store,
            vector_store,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// One eviction pass over at most `eviction_batch_size` groups.
    pub async fn run_once(&self) -> Result<EvictionRunResult, crate::db::DbError> {
        let cutoff = Utc::now() - self.config.grace();
        let group_ids = self
            .db
            .conversations()
            .find_groups_deleted_before(cutoff, self.config.eviction_batch_size)
            .await?;

        let mut result = EvictionRunResult::default();
        for group_id in group_ids {
            match self.evict_group(group_id).await {
                Ok(group_result) => {
                    result.groups_evicted += 1;
                    result.entries_deleted += group_result.entries_deleted;
                    result.conversations_deleted += group_result.conversations_deleted;
                    result.memberships_deleted += group_result.memberships_deleted;
                    result.attachments_deleted += group_result.attachments_deleted;
                    result.blobs_deleted += group_result.blobs_deleted;
                }
                Err(e) => {
                    // Skip and retry next tick; eviction must not wedge on
                    // one bad group.
                    error!(group_id = %group_id, error = %e, "Failed to evict group");
                }
            }
        }

        if result.groups_evicted > 0 {
            metrics::record_eviction(result.groups_evicted, result.entries_deleted);
        }
        Ok(result)
    }

    async fn evict_group(&self, group_id: Uuid) -> Result<EvictionRunResult, crate::db::DbError> {
        let mut result = EvictionRunResult::default();

        if let Some(vector_store) = &self.vector_store {
            if let Err(e) = vector_store.delete_group(group_id).await {
                warn!(group_id = %group_id, error = %e, "Vector delete failed; continuing");
            }
        }

        for attachment in self.db.attachments().list_by_group(group_id).await? {
            match self.db.attachments().begin_refcount_delete(attachment.id).await {
                Ok(RefcountDecision::BlobDeletable { storage_key }) => {
                    match self.blob_store.delete(&storage_key).await {
                        Ok(()) => {
                            self.db.attachments().finish_delete(attachment.id).await?;
                            result.blobs_deleted += 1;
                        }
                        Err(e) => {
                            // The soft-deleted row stays; queue a retry so
                            // the blob eventually goes too.
                            warn!(attachment_id = %attachment.id, error = %e, "Blob delete failed; queueing retry");
                            let _ = self
                                .db
                                .tasks()
                                .enqueue(NewTask::immediate(
                                    "attachment_blob_delete",
                                    serde_json::json!({ "attachment_id": attachment.id }),
                                ))
                                .await;
                        }
                    }
                    result.attachments_deleted += 1;
                }
                Ok(_) => result.attachments_deleted += 1,
                Err(crate::db::DbError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        let counts = self.db.conversations().hard_delete_group(group_id).await?;
        result.entries_deleted += counts.entries;
        result.conversations_deleted += counts.conversations;
        result.memberships_deleted += counts.memberships;

        info!(
            group_id = %group_id,
            entries = counts.entries,
            conversations = counts.conversations,
            "Group evicted"
        );
        Ok(result)
    }

    /// Admin "evict now": start a run, or join the one in flight.
    ///
    /// Concurrent triggers are deduped by the run lock, so every caller
    /// gets the same run id and the same progress stream.
    pub async fn trigger(&self) -> (Uuid, broadcast::Receiver<EvictionProgress>) {
        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            return (run.id, run.events.subscribe());
        }

        let run_id = Uuid::new_v4();
        let (events, receiver) = broadcast::channel(32);
        *active = Some(ActiveRun {
            id: run_id,
            events: events.clone(),
        });
        drop(active);

        let service = self.clone();
        tokio::spawn(async move {
            let result = service.run_once().await;
            match &result {
                Ok(result) => {
                    let _ = events.send(EvictionProgress {
                        run_id,
                        groups_evicted: result.groups_evicted,
                        done: true,
                        result: Some(result.clone()),
                    });
                }
                Err(e) => {
                    error!(error = %e, "Manual eviction run failed");
                    let _ = events.send(EvictionProgress {
                        run_id,
                        groups_evicted: 0,
                        done: true,
                        result: None,
                    });
                }
            }
            *service.active.lock().await = None;
        });

        (run_id, receiver)
    }
}

/// Periodic eviction loop; drains cleanly on cancellation.
pub async fn start_eviction_worker(service: EvictionService, shutdown: CancellationToken) {
    let interval = service.config.eviction_interval();
    info!(interval_secs = interval.as_secs(), "Starting eviction worker");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Eviction worker stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match service.run_once().await {
            Ok(result) if result.groups_evicted > 0 => {
                info!(
                    groups = result.groups_evicted,
                    entries = result.entries_deleted,
                    blobs = result.blobs_deleted,
                    "Eviction pass complete"
                );
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Eviction pass failed"),
        }
    }
}
