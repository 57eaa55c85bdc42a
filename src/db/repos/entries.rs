use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ListParams, ListResult};
use crate::{
    db::error::DbResult,
    models::{Channel, Entry, EpochFilter},
};

/// An attachment row to flip to "linked" inside the append transaction:
/// sets `entry_id` and clears `expires_at`.
#[derive(Debug, Clone)]
pub struct AttachmentLink {
    pub attachment_id: Uuid,
    pub entry_id: Uuid,
}

/// Scope of an entry listing.
#[derive(Debug, Clone)]
pub struct EntryScope {
    pub conversation_id: Uuid,
    /// When set, also include the group-wide prefix strictly before the
    /// fork point: rows with the given group id and `created_at` before the
    /// cutoff. This is how a fork sees its inherited history.
    pub group_prefix: Option<(Uuid, DateTime<Utc>)>,
}

impl EntryScope {
    pub fn conversation(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            group_prefix: None,
        }
    }
}

/// Filters applied on top of an [`EntryScope`].
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub channel: Option<Channel>,
    pub epoch: EpochFilter,
    pub client_id: Option<String>,
}

#[async_trait]
pub trait EntryRepo: Send + Sync {
    /// Append entries in one short transaction: insert the rows, bump the
    /// conversation's `updated_at` to `max(existing, now)`, and link the
    /// given attachments.
    ///
    /// Entry content arrives as the value to store verbatim (the service
    /// encrypts before calling when a key is configured).
    async fn append(
        &self,
        conversation_id: Uuid,
        entries: Vec<Entry>,
        links: Vec<AttachmentLink>,
    ) -> DbResult<Vec<Entry>>;

    /// Get a single entry by id, content as stored (possibly an encryption
    /// envelope).
    async fn get(&self, id: Uuid) -> DbResult<Option<Entry>>;

    /// List entries in `(created_at, id)` order.
    ///
    /// `EpochFilter::Latest` resolves the max epoch for
    /// `(conversation, channel, client)` with a scalar subquery in the same
    /// round trip.
    async fn list(
        &self,
        scope: EntryScope,
        filter: EntryFilter,
        params: ListParams,
    ) -> DbResult<ListResult<Entry>>;

    /// Highest memory epoch for `(conversation, client)`, if any.
    async fn latest_epoch(&self, conversation_id: Uuid, client_id: &str) -> DbResult<Option<i64>>;

    // ==================== Search & indexing ====================

    /// Full-text search over `indexed_content`, restricted to groups the
    /// user is a member of. Newest first; cursor on `(created_at, id)`.
    async fn search_history(
        &self,
        user_id: &str,
        query: &str,
        params: ListParams,
    ) -> DbResult<ListResult<Entry>>;

    /// History entries with an `indexed_content` projection that have not
    /// been vector-indexed yet, oldest first.
    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<Entry>>;

    /// Stamp `indexed_at` on the given entries.
    async fn mark_indexed(&self, ids: &[Uuid], at: DateTime<Utc>) -> DbResult<()>;
}
