use std::sync::Arc;

use uuid::Uuid;

use super::{ServiceError, ServiceResult};
use crate::{auth::Subject, config::AuthConfig, db::DbPool, models::AccessLevel};

/// Group-level access checks.
///
/// Access is always resolved against the membership table at the group
/// level; conversations inherit their group's memberships. Admin users act
/// as owner everywhere, auditors as reader everywhere. Callers with no
/// membership at all get `NotFound` rather than `Forbidden`, so the
/// existence of other users' conversations is not observable.
pub struct AccessPolicy {
    db: Arc<DbPool>,
    auth: AuthConfig,
}

impl AccessPolicy {
    pub fn new(db: Arc<DbPool>, auth: AuthConfig) -> Self {
        Self { db, auth }
    }

    pub fn is_admin(&self, subject: &Subject) -> bool {
        self.auth.is_admin(&subject.user_id)
    }

    /// Whether the subject's client may write the transcript channel.
    pub fn is_indexer(&self, subject: &Subject) -> bool {
        subject
            .client_id
            .as_deref()
            .is_some_and(|c| self.auth.is_indexer(c))
    }

    /// The subject's effective access to a group, if any.
    pub async fn access_level(
        &self,
        group_id: Uuid,
        subject: &Subject,
    ) -> ServiceResult<Option<AccessLevel>> {
        if self.auth.is_admin(&subject.user_id) {
            return Ok(Some(AccessLevel::Owner));
        }
        let membership = self.db.memberships().get(group_id, &subject.user_id).await?;
        if let Some(membership) = membership {
            return Ok(Some(membership.access_level));
        }
        if self.auth.is_auditor(&subject.user_id) {
            return Ok(Some(AccessLevel::Reader));
        }
        Ok(None)
    }

    /// Require at least `required` on the group.
    ///
    /// Missing membership is `NotFound`; an insufficient level is
    /// `Forbidden`.
    pub async fn require(
        &self,
        group_id: Uuid,
        subject: &Subject,
        required: AccessLevel,
    ) -> ServiceResult<AccessLevel> {
        match self.access_level(group_id, subject).await? {
            None => Err(ServiceError::NotFound),
            Some(level) if level.allows(required) => Ok(level),
            Some(level) => Err(ServiceError::Forbidden(format!(
                "requires {} access, caller has {}",
                required.as_str(),
                level.as_str()
            ))),
        }
    }
}
