use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Semantic track an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// User-visible transcript.
    History,
    /// Agent working memory, versioned by epoch and scoped by client.
    Memory,
    /// Indexed summaries written by role-guarded agents.
    Transcript,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::History => "history",
            Channel::Memory => "memory",
            Channel::Transcript => "transcript",
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "history" => Ok(Channel::History),
            "memory" => Ok(Channel::Memory),
            "transcript" => Ok(Channel::Transcript),
            _ => Err(format!("Invalid channel: {}", s)),
        }
    }
}

/// An immutable record in a conversation.
///
/// Entries are append-only: once written, `content` and `created_at` never
/// change. Ordering within a conversation is `(created_at, id)`; ids are
/// UUIDv7 so the id component is itself time-ordered and breaks ties under
/// clock skew.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Denormalized from the conversation for cross-fork queries.
    pub group_id: Uuid,
    pub channel: Channel,
    pub content_type: String,
    /// Memory window version. Present iff `channel == Memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<i64>,
    /// Agent identity. Required on memory entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Opaque payload: a JSON array of values understood by cooperating
    /// agents. At rest this may be an encryption envelope; the service
    /// decrypts before returning entries to callers.
    pub content: serde_json::Value,
    /// Search projection; only on history entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_content: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
}

/// One entry in an append request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEntry {
    pub channel: Channel,
    pub content_type: String,
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    /// Memory only. Defaults to the current latest epoch when omitted.
    pub epoch: Option<i64>,
    /// Search projection; history only, rejected elsewhere.
    pub indexed_content: Option<String>,
}

/// Request body for appending entries to a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendEntries {
    pub entries: Vec<NewEntry>,
}

/// Request body for a memory sync: the agent's current full window.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncMemory {
    pub content_type: String,
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
}

/// Result of a memory sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    /// The incoming window already matched the stored one.
    pub no_op: bool,
    /// The window diverged and a new epoch was opened.
    pub epoch_incremented: bool,
    /// The epoch the window now lives at.
    pub epoch: i64,
    /// The entry written by this sync, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<Entry>,
}

impl SyncOutcome {
    pub fn no_op(epoch: i64) -> Self {
        Self {
            no_op: true,
            epoch_incremented: false,
            epoch,
            entry: None,
        }
    }
}

/// Epoch filter for entry listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EpochFilter {
    /// No filter; every epoch.
    #[default]
    All,
    /// Only the latest epoch for the `(conversation, client)` pair.
    Latest,
    /// A specific epoch.
    At(i64),
}

/// Query options for listing entries.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
    pub channel: Option<Channel>,
    pub epoch: EpochFilter,
    pub client_id: Option<String>,
    /// Include entries from every conversation in the group that precede the
    /// fork point, not just the addressed conversation's own chain.
    pub all_forks: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_str() {
        for channel in [Channel::History, Channel::Memory, Channel::Transcript] {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
        assert!("logs".parse::<Channel>().is_err());
    }

    #[test]
    fn channel_serde_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&Channel::Memory).unwrap(),
            "\"memory\""
        );
        let parsed: Channel = serde_json::from_str("\"history\"").unwrap();
        assert_eq!(parsed, Channel::History);
    }
}
