use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{db::error::DbResult, models::Attachment};

/// Outcome of the reference-counting phase of an attachment delete.
///
/// Deletion is a two-phase protocol so that a crash never orphans a live
/// blob:
///
/// 1. In one transaction, all rows sharing the attachment's `storage_key`
///    are locked. If other live rows reference the key, the row is
///    hard-deleted and the blob stays ([`RefcountDecision::BlobRetained`]).
///    Otherwise the row is soft-deleted and committed
///    ([`RefcountDecision::BlobDeletable`]).
/// 2. The caller deletes the blob, then hard-deletes the soft-deleted row.
///    If the process dies in between, the cleanup job finds the
///    soft-deleted row, retries the (idempotent) blob delete, and finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefcountDecision {
    /// Other live rows share the storage key; the row is gone, the blob
    /// stays.
    BlobRetained,
    /// This was the last live reference. The row is soft-deleted; delete
    /// the blob, then call `finish_delete`.
    BlobDeletable { storage_key: String },
    /// The attachment had no stored blob yet; the row is gone.
    NoBlob,
}

#[async_trait]
pub trait AttachmentRepo: Send + Sync {
    async fn create(&self, attachment: Attachment) -> DbResult<Attachment>;

    /// Get a live (non-soft-deleted) attachment.
    async fn get(&self, id: Uuid) -> DbResult<Option<Attachment>>;

    /// Record a completed upload: storage key, size, digest, and the final
    /// unlinked expiry.
    async fn record_upload(
        &self,
        id: Uuid,
        storage_key: &str,
        size_bytes: i64,
        sha256: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<Attachment>;

    /// Group of the entry this attachment is linked to, if linked.
    async fn linked_group_id(&self, id: Uuid) -> DbResult<Option<Uuid>>;

    /// Run the locked reference-count decision for deleting this attachment.
    async fn begin_refcount_delete(&self, id: Uuid) -> DbResult<RefcountDecision>;

    /// Hard-delete a row after its blob has been removed.
    async fn finish_delete(&self, id: Uuid) -> DbResult<()>;

    /// Hard-delete a row outright (upload failures, expiry reaping).
    async fn delete_row(&self, id: Uuid) -> DbResult<()>;

    /// Live rows referencing a storage key. Drives the blob-refcount
    /// invariant checks.
    async fn count_live_by_storage_key(&self, storage_key: &str) -> DbResult<i64>;

    // ==================== Cleanup & eviction ====================

    /// Unlinked attachments whose `expires_at` has passed.
    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Attachment>>;

    /// Soft-deleted rows left behind by a crash between blob delete and
    /// `finish_delete`.
    async fn find_soft_deleted(&self, limit: i64) -> DbResult<Vec<Attachment>>;

    /// Attachments linked to any entry of the given group.
    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<Attachment>>;
}
