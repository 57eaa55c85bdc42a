use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::RetentionConfig,
    db::{DbError, DbPool, RefcountDecision},
    observability::metrics,
    services::BlobStore,
};

/// Reaps expired unlinked attachments and finishes deletions a crash left
/// half-done (soft-deleted row, blob possibly still present).
#[derive(Clone)]
pub struct AttachmentCleanup {
    db: Arc<DbPool>,
    blob_store: Arc<dyn BlobStore>,
    config: RetentionConfig,
}

impl AttachmentCleanup {
    pub fn new(db: Arc<DbPool>, blob_store: Arc<dyn BlobStore>, config: RetentionConfig) -> Self {
        Self {
            db,
            blob_store,
            config,
        }
    }

    pub async fn run_once(&self) -> Result<u64, DbError> {
        let mut removed = 0;
        removed += self.reap_expired().await?;
        removed += self.finish_interrupted().await?;
        if removed > 0 {
            metrics::record_attachment_cleanup(removed);
        }
        Ok(removed)
    }

    /// Unlinked attachments whose expiry passed go through the normal
    /// reference-counted delete.
    async fn reap_expired(&self) -> Result<u64, DbError> {
        let expired = self
            .db
            .attachments()
            .find_expired(Utc::now(), self.config.cleanup_batch_size)
            .await?;

        let mut removed = 0;
        for attachment in expired {
            match self.db.attachments().begin_refcount_delete(attachment.id).await {
                Ok(RefcountDecision::BlobDeletable { storage_key }) => {
                    match self.blob_store.delete(&storage_key).await {
                        Ok(()) => {
                            self.db.attachments().finish_delete(attachment.id).await?;
                            removed += 1;
                        }
                        Err(e) => {
                            // Row is soft-deleted now; the next pass retries.
                            warn!(attachment_id = %attachment.id, error = %e, "Blob delete failed during cleanup");
                        }
                    }
                }
                Ok(_) => removed += 1,
                Err(DbError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Soft-deleted rows mean a crash happened between the refcount commit
    /// and the blob delete. Blob deletion is idempotent, so retry and
    /// finish.
    async fn finish_interrupted(&self) -> Result<u64, DbError> {
        let orphans = self
            .db
            .attachments()
            .find_soft_deleted(self.config.cleanup_batch_size)
            .await?;

        let mut removed = 0;
        for attachment in orphans {
            if let Some(storage_key) = &attachment.storage_key {
                if let Err(e) = self.blob_store.delete(storage_key).await {
                    warn!(attachment_id = %attachment.id, error = %e, "Blob delete retry failed");
                    continue;
                }
            }
            self.db.attachments().finish_delete(attachment.id).await?;
            debug!(attachment_id = %attachment.id, "Finished interrupted attachment delete");
            removed += 1;
        }
        Ok(removed)
    }
}

/// Periodic cleanup loop; drains cleanly on cancellation.
pub async fn start_cleanup_worker(cleanup: AttachmentCleanup, shutdown: CancellationToken) {
    let interval = cleanup.config.cleanup_interval();
    info!(interval_secs = interval.as_secs(), "Starting attachment cleanup worker");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Attachment cleanup worker stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match cleanup.run_once().await {
            Ok(removed) if removed > 0 => {
                info!(removed, "Attachment cleanup pass complete");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Attachment cleanup pass failed"),
        }
    }
}
