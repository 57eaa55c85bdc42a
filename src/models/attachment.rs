use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata row for an uploaded blob.
///
/// Several rows may share one `storage_key` (forked entries reference the
/// same bytes); the blob is deletable only when the last live row sharing
/// the key goes away. An unlinked row carries `expires_at` and is reaped by
/// the cleanup job; linking to an entry clears it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    /// The uploading user.
    pub user_id: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub size_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Opaque blob-store handle. Not exposed to clients.
    #[serde(skip_serializing)]
    pub storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// Whether this attachment has been linked to an entry.
    pub fn is_linked(&self) -> bool {
        self.entry_id.is_some()
    }
}

/// Upload metadata supplied before the byte stream.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAttachment {
    pub content_type: String,
    pub filename: Option<String>,
    /// Requested retention for the unlinked row; clamped to the configured
    /// maximum. Linking clears expiry entirely.
    pub expires_in_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_is_not_serialized() {
        let attachment = Attachment {
            id: Uuid::new_v4(),
            user_id: "alice".into(),
            content_type: "image/png".into(),
            filename: Some("cat.png".into()),
            size_bytes: 4,
            sha256: Some("ab".repeat(32)),
            storage_key: Some("blob-1".into()),
            entry_id: None,
            expires_at: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        let json = serde_json::to_value(&attachment).unwrap();
        assert!(json.get("storage_key").is_none());
        assert!(json.get("sha256").is_some());
    }
}
