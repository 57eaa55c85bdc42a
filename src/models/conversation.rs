use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Root of a fork tree.
///
/// Every conversation belongs to exactly one group; forks join the parent's
/// group. The group is the unit of sharing, soft delete, and eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationGroup {
    pub id: Uuid,
    pub owner_user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A conversation: one branch of a fork tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Immutable once created; forks inherit the parent's group.
    pub group_id: Uuid,
    pub owner_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Opaque client metadata. The service stores it verbatim.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Set on forks: the conversation this one was forked from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_conversation_id: Option<Uuid>,
    /// Set on forks: the first parent entry *excluded* from the fork's history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_at_entry_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether this conversation is a fork (as opposed to a fork-tree root).
    pub fn is_fork(&self) -> bool {
        self.forked_at_conversation_id.is_some()
    }
}

/// Filter applied when listing conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListMode {
    /// Every conversation the caller can see.
    #[default]
    All,
    /// Fork-tree roots only.
    Roots,
    /// Per group, only the most recently updated conversation.
    LatestFork,
}

impl ListMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListMode::All => "all",
            ListMode::Roots => "roots",
            ListMode::LatestFork => "latest-fork",
        }
    }
}

impl std::str::FromStr for ListMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ListMode::All),
            "roots" => Ok(ListMode::Roots),
            "latest-fork" => Ok(ListMode::LatestFork),
            _ => Err(format!("Invalid list mode: {}", s)),
        }
    }
}

/// Request to create a conversation.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateConversation {
    #[validate(length(max = 255))]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Request to update a conversation's title and/or metadata.
///
/// `None` fields are left untouched; `metadata` replaces the whole map.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateConversation {
    #[validate(length(max = 255))]
    pub title: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Request to fork a conversation at a given history entry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForkConversation {
    /// The user-authored history entry to fork at. The fork's history is the
    /// parent's prefix strictly before this entry.
    pub entry_id: Uuid,
    #[validate(length(max = 255))]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_mode_round_trips_through_str() {
        for mode in [ListMode::All, ListMode::Roots, ListMode::LatestFork] {
            assert_eq!(mode.as_str().parse::<ListMode>().unwrap(), mode);
        }
        assert!("latest".parse::<ListMode>().is_err());
    }

    #[test]
    fn fork_detection_uses_fork_pointer() {
        let now = Utc::now();
        let mut conv = Conversation {
            id: Uuid::new_v4(),
            group_id: Uuid::new_v4(),
            owner_user_id: "alice".into(),
            title: None,
            metadata: Default::default(),
            forked_at_conversation_id: None,
            forked_at_entry_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(!conv.is_fork());
        conv.forked_at_conversation_id = Some(Uuid::new_v4());
        assert!(conv.is_fork());
    }
}
