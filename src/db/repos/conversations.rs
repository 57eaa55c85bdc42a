use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ListParams, ListResult};
use crate::{
    db::error::DbResult,
    models::{Conversation, ConversationGroup, ListMode},
};

/// Row counts from hard-deleting a conversation group.
#[derive(Debug, Default, Clone, Copy)]
pub struct GroupDeleteCounts {
    pub entries: u64,
    pub memberships: u64,
    pub conversations: u64,
    pub transfers: u64,
}

#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Create a fork-tree root: inserts the group, the conversation, and the
    /// owner membership in one transaction.
    async fn create_root(
        &self,
        group: ConversationGroup,
        conversation: Conversation,
    ) -> DbResult<Conversation>;

    /// Insert a fork into an existing group.
    async fn create_fork(&self, conversation: Conversation) -> DbResult<Conversation>;

    /// Get a conversation, hiding rows whose conversation or group is
    /// soft-deleted.
    async fn get(&self, id: Uuid) -> DbResult<Option<Conversation>>;

    /// Get a conversation regardless of soft-delete state. Admin and
    /// eviction paths only.
    async fn get_including_deleted(&self, id: Uuid) -> DbResult<Option<Conversation>>;

    async fn get_group(&self, group_id: Uuid) -> DbResult<Option<ConversationGroup>>;

    /// List conversations in groups the user is a member of.
    ///
    /// Ordered by `updated_at` so recently-used conversations come first;
    /// the cursor encodes `(updated_at, id)`.
    async fn list_for_user(
        &self,
        user_id: &str,
        mode: ListMode,
        params: ListParams,
    ) -> DbResult<ListResult<Conversation>>;

    /// List all live conversations in a group, oldest first.
    async fn list_group(&self, group_id: Uuid) -> DbResult<Vec<Conversation>>;

    /// Update title and/or metadata. `None` leaves the field untouched.
    async fn update(
        &self,
        id: Uuid,
        title: Option<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Conversation>;

    /// Soft-delete the whole group: stamps `deleted_at` on the group and on
    /// every conversation in it, and hard-deletes the group's memberships.
    async fn soft_delete_group(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()>;

    // ==================== Eviction ====================

    /// Groups soft-deleted before the cutoff, oldest first.
    async fn find_groups_deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Uuid>>;

    /// Hard-delete everything that remains of a group: entries,
    /// memberships, transfers, conversations, and the group row itself.
    ///
    /// Attachment rows and vectors are removed by the eviction service
    /// before this call; this is the final, irreversible step.
    async fn hard_delete_group(&self, group_id: Uuid) -> DbResult<GroupDeleteCounts>;
}
