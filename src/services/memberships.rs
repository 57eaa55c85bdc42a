use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{AccessPolicy, ServiceError, ServiceResult};
use crate::{
    auth::Subject,
    db::DbPool,
    models::{
        AccessLevel, ConversationMembership, CreateTransfer, OwnershipTransfer, ShareRequest,
        TransferStatus,
    },
};

/// Sharing and ownership transfer for conversation groups.
#[derive(Clone)]
pub struct MembershipService {
    db: Arc<DbPool>,
    access: Arc<AccessPolicy>,
}

impl MembershipService {
    pub fn new(db: Arc<DbPool>, access: Arc<AccessPolicy>) -> Self {
        Self { db, access }
    }

    async fn group_of(&self, conversation_id: Uuid) -> ServiceResult<Uuid> {
        Ok(self
            .db
            .conversations()
            .get(conversation_id)
            .await?
            .ok_or(ServiceError::NotFound)?
            .group_id)
    }

    /// List a group's memberships. Any member may look.
    pub async fn list(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
    ) -> ServiceResult<Vec<ConversationMembership>> {
        let group_id = self.group_of(conversation_id).await?;
        self.access
            .require(group_id, subject, AccessLevel::Reader)
            .await?;
        Ok(self.db.memberships().list_for_group(group_id).await?)
    }

    /// Share the group with a user, or change an existing sharee's level.
    ///
    /// The owner row is immutable here; ownership moves only through
    /// transfers.
    #[instrument(skip(self, input), fields(user = %subject.user_id))]
    pub async fn share(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        input: ShareRequest,
    ) -> ServiceResult<ConversationMembership> {
        let group_id = self.group_of(conversation_id).await?;
        self.access
            .require(group_id, subject, AccessLevel::Owner)
            .await?;

        if input.access_level == AccessLevel::Owner {
            return Err(ServiceError::Validation(
                "ownership is granted through transfers, not shares".into(),
            ));
        }
        if let Some(existing) = self.db.memberships().get(group_id, &input.user_id).await? {
            if existing.access_level == AccessLevel::Owner {
                return Err(ServiceError::Validation(
                    "the owner's membership cannot be changed by sharing".into(),
                ));
            }
        }

        let membership = self
            .db
            .memberships()
            .upsert(ConversationMembership {
                group_id,
                user_id: input.user_id,
                access_level: input.access_level,
                created_at: Utc::now(),
            })
            .await?;
        info!(group_id = %group_id, sharee = %membership.user_id, level = membership.access_level.as_str(), "Group shared");
        Ok(membership)
    }

    /// Remove a sharee. The owner cannot be unshared.
    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn unshare(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        sharee: &str,
    ) -> ServiceResult<()> {
        let group_id = self.group_of(conversation_id).await?;
        self.access
            .require(group_id, subject, AccessLevel::Owner)
            .await?;

        match self.db.memberships().get(group_id, sharee).await? {
            None => return Err(ServiceError::NotFound),
            Some(membership) if membership.access_level == AccessLevel::Owner => {
                return Err(ServiceError::Validation(
                    "the owner cannot be removed from their group".into(),
                ));
            }
            Some(_) => {}
        }

        self.db.memberships().delete(group_id, sharee).await?;
        Ok(())
    }

    /// Propose transferring ownership. Conflicts if a transfer is already
    /// pending for the group.
    #[instrument(skip(self, input), fields(user = %subject.user_id))]
    pub async fn create_transfer(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        input: CreateTransfer,
    ) -> ServiceResult<OwnershipTransfer> {
        let group_id = self.group_of(conversation_id).await?;
        self.access
            .require(group_id, subject, AccessLevel::Owner)
            .await?;

        if input.to_user_id == subject.user_id {
            return Err(ServiceError::Validation(
                "cannot transfer ownership to yourself".into(),
            ));
        }

        let transfer = self
            .db
            .transfers()
            .create(OwnershipTransfer {
                id: Uuid::new_v4(),
                group_id,
                from_user_id: subject.user_id.clone(),
                to_user_id: input.to_user_id,
                status: TransferStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;
        info!(transfer_id = %transfer.id, group_id = %group_id, to = %transfer.to_user_id, "Ownership transfer proposed");
        Ok(transfer)
    }

    /// Pending transfers the subject proposed or is the target of.
    pub async fn list_transfers(
        &self,
        subject: &Subject,
    ) -> ServiceResult<Vec<OwnershipTransfer>> {
        Ok(self.db.transfers().list_for_user(&subject.user_id).await?)
    }

    pub async fn get_transfer(
        &self,
        subject: &Subject,
        transfer_id: Uuid,
    ) -> ServiceResult<OwnershipTransfer> {
        let transfer = self
            .db
            .transfers()
            .get(transfer_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if transfer.from_user_id != subject.user_id
            && transfer.to_user_id != subject.user_id
            && !self.access.is_admin(subject)
        {
            return Err(ServiceError::NotFound);
        }
        Ok(transfer)
    }

    /// Accept a pending transfer. Only the proposed owner may accept; the
    /// accept transaction atomically rewrites the group owner, promotes the
    /// acceptor, and demotes the previous owner to writer.
    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn accept_transfer(
        &self,
        subject: &Subject,
        transfer_id: Uuid,
    ) -> ServiceResult<OwnershipTransfer> {
        let transfer = self.get_transfer(subject, transfer_id).await?;
        if transfer.to_user_id != subject.user_id {
            return Err(ServiceError::Forbidden(
                "only the proposed owner may accept a transfer".into(),
            ));
        }
        let accepted = self.db.transfers().accept(transfer_id).await?;
        info!(transfer_id = %transfer_id, group_id = %accepted.group_id, "Ownership transfer accepted");
        Ok(accepted)
    }

    /// Cancel a pending transfer. Either party may cancel.
    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn cancel_transfer(
        &self,
        subject: &Subject,
        transfer_id: Uuid,
    ) -> ServiceResult<OwnershipTransfer> {
        let transfer = self.get_transfer(subject, transfer_id).await?;
        if transfer.from_user_id != subject.user_id && transfer.to_user_id != subject.user_id {
            return Err(ServiceError::Forbidden(
                "only the transfer parties may cancel it".into(),
            ));
        }
        Ok(self.db.transfers().cancel(transfer_id).await?)
    }
}
