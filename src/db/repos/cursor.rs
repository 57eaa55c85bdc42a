//! Keyset pagination cursors.
//!
//! Listings paginate with opaque after-cursors rather than offsets: cursors
//! stay stable as rows are appended and let queries seek on an indexed
//! `(timestamp, id)` tuple. Conversation listings key the cursor on
//! `updated_at`; entry listings key it on `created_at`.
//!
//! Cursors encode timestamps at millisecond precision, so row timestamps
//! must be truncated to milliseconds on write (see [`truncate_to_millis`]) or
//! SQLite's TEXT comparison will disagree with the decoded cursor.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Error type for cursor operations.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("invalid cursor format")]
    InvalidFormat,
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid timestamp in cursor")]
    InvalidTimestamp,
    #[error("invalid UUID in cursor")]
    InvalidUuid,
}

/// A position in an ordered result set: a timestamp plus the row id as a
/// tiebreaker for rows sharing that timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// The ordering timestamp (`updated_at` or `created_at` depending on the
    /// listing).
    pub ts: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(ts: DateTime<Utc>, id: Uuid) -> Self {
        Self { ts, id }
    }

    /// Encode as URL-safe base64 of `{timestamp_millis}:{uuid}`.
    pub fn encode(&self) -> String {
        let raw = format!("{}:{}", self.ts.timestamp_millis(), self.id);
        URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    pub fn decode(encoded: &str) -> Result<Self, CursorError> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
        let raw = String::from_utf8(bytes).map_err(|_| CursorError::InvalidFormat)?;

        // UUIDs use hyphens not colons, so ':' cleanly separates the parts.
        let (millis_str, uuid_str) = raw.split_once(':').ok_or(CursorError::InvalidFormat)?;

        let millis: i64 = millis_str.parse().map_err(|_| CursorError::InvalidTimestamp)?;
        let ts = DateTime::from_timestamp_millis(millis).ok_or(CursorError::InvalidTimestamp)?;
        let id = Uuid::parse_str(uuid_str).map_err(|_| CursorError::InvalidUuid)?;

        Ok(Self { ts, id })
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl Serialize for Cursor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cursor::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Direction for cursor-based pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    #[default]
    Forward,
    Backward,
}

/// Cursors for navigating paginated results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageCursors {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Cursor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Cursor>,
}

impl PageCursors {
    /// Create cursors from the page's items, in returned order.
    pub fn from_items<T, F>(
        items: &[T],
        has_more: bool,
        direction: CursorDirection,
        cursor: Option<&Cursor>,
        get_cursor: F,
    ) -> Self
    where
        F: Fn(&T) -> Cursor,
    {
        if items.is_empty() {
            return Self::default();
        }

        let first = get_cursor(&items[0]);
        let last = get_cursor(&items[items.len() - 1]);

        match direction {
            CursorDirection::Forward => Self {
                next: if has_more { Some(last) } else { None },
                prev: cursor.map(|_| first),
            },
            CursorDirection::Backward => Self {
                next: cursor.map(|_| first),
                prev: if has_more { Some(last) } else { None },
            },
        }
    }
}

/// Truncate a DateTime to millisecond precision.
///
/// Row timestamps that participate in cursor pagination must be written at
/// the same precision the cursor encodes, or the seek predicate will skip or
/// repeat rows on backends that compare timestamps as TEXT.
pub fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let cursor = Cursor::new(Utc::now(), Uuid::new_v4());
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor.ts.timestamp_millis(), decoded.ts.timestamp_millis());
        assert_eq!(cursor.id, decoded.id);
    }

    #[test]
    fn encoding_is_url_safe() {
        let encoded = Cursor::new(Utc::now(), Uuid::new_v4()).encode();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Cursor::decode("not valid base64!!!"),
            Err(CursorError::Base64(_))
        ));

        let no_colon = URL_SAFE_NO_PAD.encode(b"missing-separator");
        assert!(matches!(
            Cursor::decode(&no_colon),
            Err(CursorError::InvalidFormat)
        ));

        let bad_ts =
            URL_SAFE_NO_PAD.encode(b"not_a_number:00000000-0000-0000-0000-000000000000");
        assert!(matches!(
            Cursor::decode(&bad_ts),
            Err(CursorError::InvalidTimestamp)
        ));

        let bad_uuid = URL_SAFE_NO_PAD.encode(b"1234567890:not-a-uuid");
        assert!(matches!(
            Cursor::decode(&bad_uuid),
            Err(CursorError::InvalidUuid)
        ));
    }

    #[test]
    fn page_cursors_first_page_with_more() {
        let items = vec![(Utc::now(), Uuid::new_v4()), (Utc::now(), Uuid::new_v4())];
        let cursors = PageCursors::from_items(
            &items,
            true,
            CursorDirection::Forward,
            None,
            |(ts, id)| Cursor::new(*ts, *id),
        );
        assert!(cursors.next.is_some());
        assert!(cursors.prev.is_none());
    }

    #[test]
    fn page_cursors_last_page() {
        let items = vec![(Utc::now(), Uuid::new_v4())];
        let prev = Cursor::new(Utc::now(), Uuid::new_v4());
        let cursors = PageCursors::from_items(
            &items,
            false,
            CursorDirection::Forward,
            Some(&prev),
            |(ts, id)| Cursor::new(*ts, *id),
        );
        assert!(cursors.next.is_none());
        assert!(cursors.prev.is_some());
    }

    #[test]
    fn truncation_drops_sub_millisecond_precision() {
        let dt = DateTime::from_timestamp_nanos(1_700_000_000_123_456_789);
        let truncated = truncate_to_millis(dt);
        assert_eq!(truncated.timestamp_subsec_micros() % 1000, 0);
        assert_eq!(truncated.timestamp_millis(), dt.timestamp_millis());
    }
}
