use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{ConversationMembership, OwnershipTransfer},
};

#[async_trait]
pub trait MembershipRepo: Send + Sync {
    /// Create or update a membership. The owner row is never touched here;
    /// owner changes go through ownership transfers.
    async fn upsert(&self, membership: ConversationMembership) -> DbResult<ConversationMembership>;

    async fn get(&self, group_id: Uuid, user_id: &str)
        -> DbResult<Option<ConversationMembership>>;

    async fn list_for_group(&self, group_id: Uuid) -> DbResult<Vec<ConversationMembership>>;

    /// Hard-delete a membership (unshare).
    async fn delete(&self, group_id: Uuid, user_id: &str) -> DbResult<()>;

    /// Ids of live groups the user can read (any access level).
    async fn readable_group_ids(&self, user_id: &str) -> DbResult<Vec<Uuid>>;
}

#[async_trait]
pub trait OwnershipTransferRepo: Send + Sync {
    /// Insert a pending transfer. Returns `Conflict` if the group already
    /// has one pending (enforced by a partial unique index).
    async fn create(&self, transfer: OwnershipTransfer) -> DbResult<OwnershipTransfer>;

    async fn get(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>>;

    /// Pending transfers the user proposed or is the target of.
    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<OwnershipTransfer>>;

    async fn find_pending_for_group(&self, group_id: Uuid)
        -> DbResult<Option<OwnershipTransfer>>;

    /// Accept a pending transfer: in one transaction, rewrite the group's
    /// owner, promote the target to `owner`, demote the previous owner to
    /// `writer`, and mark the transfer accepted.
    ///
    /// Returns `Conflict` if the transfer is no longer pending.
    async fn accept(&self, id: Uuid) -> DbResult<OwnershipTransfer>;

    /// Cancel a pending transfer. Returns `Conflict` if it is no longer
    /// pending.
    async fn cancel(&self, id: Uuid) -> DbResult<OwnershipTransfer>;
}
