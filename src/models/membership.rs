use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access level a user holds on a conversation group.
///
/// Levels are ordered: `Owner > Writer > Reader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Writer,
    Reader,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Writer => "writer",
            AccessLevel::Reader => "reader",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            AccessLevel::Owner => 3,
            AccessLevel::Writer => 2,
            AccessLevel::Reader => 1,
        }
    }

    /// Whether this level satisfies `required`.
    pub fn allows(&self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(AccessLevel::Owner),
            "writer" => Ok(AccessLevel::Writer),
            "reader" => Ok(AccessLevel::Reader),
            _ => Err(format!("Invalid access level: {}", s)),
        }
    }
}

/// A user's membership in a conversation group.
///
/// Memberships are hard-deleted when sharing ends; there is no tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMembership {
    pub group_id: Uuid,
    pub user_id: String,
    pub access_level: AccessLevel,
    pub created_at: DateTime<Utc>,
}

/// Request to share a group with a user (create or update a membership).
#[derive(Debug, Clone, Deserialize)]
pub struct ShareRequest {
    pub user_id: String,
    pub access_level: AccessLevel,
}

/// State of an ownership transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Accepted,
    Cancelled,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Accepted => "accepted",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransferStatus::Pending),
            "accepted" => Ok(TransferStatus::Accepted),
            "cancelled" => Ok(TransferStatus::Cancelled),
            _ => Err(format!("Invalid transfer status: {}", s)),
        }
    }
}

/// A two-step ownership transfer for a conversation group.
///
/// The owner proposes; the proposed owner accepts, which atomically makes
/// them the group owner and demotes the previous owner to writer. Either
/// party may cancel while pending. At most one pending transfer exists per
/// group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub id: Uuid,
    pub group_id: Uuid,
    pub from_user_id: String,
    pub to_user_id: String,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
}

/// Request to propose an ownership transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransfer {
    pub to_user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_levels_are_ordered() {
        assert!(AccessLevel::Owner.allows(AccessLevel::Reader));
        assert!(AccessLevel::Owner.allows(AccessLevel::Owner));
        assert!(AccessLevel::Writer.allows(AccessLevel::Reader));
        assert!(!AccessLevel::Writer.allows(AccessLevel::Owner));
        assert!(!AccessLevel::Reader.allows(AccessLevel::Writer));
    }

    #[test]
    fn access_level_round_trips_through_str() {
        for level in [AccessLevel::Owner, AccessLevel::Writer, AccessLevel::Reader] {
            assert_eq!(level.as_str().parse::<AccessLevel>().unwrap(), level);
        }
    }

    #[test]
    fn transfer_status_round_trips_through_str() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Accepted,
            TransferStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TransferStatus>().unwrap(), status);
        }
    }
}
