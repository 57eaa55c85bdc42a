use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{AccessPolicy, ServiceError, ServiceResult};
use crate::{
    auth::Subject,
    db::{DbPool, ListParams, ListResult, cursor::truncate_to_millis},
    models::{
        AccessLevel, Channel, Conversation, ConversationGroup, CreateConversation,
        ForkConversation, ListMode, UpdateConversation,
    },
};

/// Conversation lifecycle: create, list, fork, update, soft-delete.
#[derive(Clone)]
pub struct ConversationService {
    db: Arc<DbPool>,
    access: Arc<AccessPolicy>,
}

impl ConversationService {
    pub fn new(db: Arc<DbPool>, access: Arc<AccessPolicy>) -> Self {
        Self { db, access }
    }

    /// Create a fork-tree root owned by the subject.
    #[instrument(skip(self, input), fields(user = %subject.user_id))]
    pub async fn create(
        &self,
        subject: &Subject,
        input: CreateConversation,
    ) -> ServiceResult<Conversation> {
        let now = truncate_to_millis(Utc::now());
        let group = ConversationGroup {
            id: Uuid::new_v4(),
            owner_user_id: subject.user_id.clone(),
            created_at: now,
            deleted_at: None,
        };
        let conversation = Conversation {
            id: Uuid::new_v4(),
            group_id: group.id,
            owner_user_id: subject.user_id.clone(),
            title: input.title,
            metadata: input.metadata,
            forked_at_conversation_id: None,
            forked_at_entry_id: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.db.conversations().create_root(group, conversation).await?;
        info!(conversation_id = %created.id, group_id = %created.group_id, "Conversation created");
        Ok(created)
    }

    /// Get a conversation the subject can read.
    pub async fn get(&self, subject: &Subject, id: Uuid) -> ServiceResult<Conversation> {
        let conversation = self
            .db
            .conversations()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require(conversation.group_id, subject, AccessLevel::Reader)
            .await?;
        Ok(conversation)
    }

    /// List conversations in groups the subject belongs to.
    pub async fn list(
        &self,
        subject: &Subject,
        mode: ListMode,
        params: ListParams,
    ) -> ServiceResult<ListResult<Conversation>> {
        Ok(self
            .db
            .conversations()
            .list_for_user(&subject.user_id, mode, params)
            .await?)
    }

    /// All live conversations in the subject's fork tree.
    pub async fn list_forks(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
    ) -> ServiceResult<Vec<Conversation>> {
        let conversation = self.get(subject, conversation_id).await?;
        Ok(self
            .db
            .conversations()
            .list_group(conversation.group_id)
            .await?)
    }

    /// Update title/metadata. Requires writer access.
    #[instrument(skip(self, input), fields(user = %subject.user_id))]
    pub async fn update(
        &self,
        subject: &Subject,
        id: Uuid,
        input: UpdateConversation,
    ) -> ServiceResult<Conversation> {
        let conversation = self
            .db
            .conversations()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require(conversation.group_id, subject, AccessLevel::Writer)
            .await?;
        Ok(self
            .db
            .conversations()
            .update(id, input.title, input.metadata)
            .await?)
    }

    /// Fork a conversation at a history entry the user authored.
    ///
    /// The fork joins the parent's group; its history is the group-wide
    /// prefix strictly before the fork entry.
    #[instrument(skip(self, input), fields(user = %subject.user_id))]
    pub async fn fork(
        &self,
        subject: &Subject,
        conversation_id: Uuid,
        input: ForkConversation,
    ) -> ServiceResult<Conversation> {
        let parent = self
            .db
            .conversations()
            .get(conversation_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require(parent.group_id, subject, AccessLevel::Owner)
            .await?;

        let entry = self
            .db
            .entries()
            .get(input.entry_id)
            .await?
            .ok_or_else(|| ServiceError::Validation("fork entry not found".into()))?;
        if entry.group_id != parent.group_id {
            return Err(ServiceError::Validation(
                "fork entry belongs to a different conversation group".into(),
            ));
        }
        if entry.channel != Channel::History {
            return Err(ServiceError::Validation(
                "forks must anchor at a history entry".into(),
            ));
        }
        if entry.user_id.as_deref() != Some(subject.user_id.as_str()) {
            return Err(ServiceError::Validation(
                "forks must anchor at an entry the user authored".into(),
            ));
        }

        let now = truncate_to_millis(Utc::now());
        let fork = Conversation {
            id: Uuid::new_v4(),
            group_id: parent.group_id,
            owner_user_id: subject.user_id.clone(),
            title: input.title.or_else(|| parent.title.clone()),
            metadata: parent.metadata.clone(),
            forked_at_conversation_id: Some(parent.id),
            forked_at_entry_id: Some(entry.id),
            created_at: now,
            updated_at: now,
        };

        let created = self.db.conversations().create_fork(fork).await?;
        info!(
            fork_id = %created.id,
            parent_id = %parent.id,
            entry_id = %entry.id,
            "Conversation forked"
        );
        Ok(created)
    }

    /// Soft-delete the subject's conversation — which cascades to the whole
    /// group — and hard-delete its memberships. Requires owner access.
    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn delete(&self, subject: &Subject, id: Uuid) -> ServiceResult<()> {
        let conversation = self
            .db
            .conversations()
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        self.access
            .require(conversation.group_id, subject, AccessLevel::Owner)
            .await?;

        self.db
            .conversations()
            .soft_delete_group(conversation.group_id, Utc::now())
            .await?;
        info!(group_id = %conversation.group_id, "Conversation group soft-deleted");
        Ok(())
    }
}
