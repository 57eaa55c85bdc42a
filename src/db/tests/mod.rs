//! Shared database repository test infrastructure.
//!
//! The same test logic runs against both backends:
//!
//! - **Unit tests (SQLite)**: fast, in-memory, run with every `cargo test`
//! - **Integration tests (PostgreSQL)**: testcontainers-based, run with
//!   `cargo test -- --ignored`
//!
//! Each module holds shared test functions taking `&DbPool`, thin SQLite
//! wrappers, and `#[ignore]`d PostgreSQL wrappers.

mod attachments;
mod conversations;
mod entries;
pub mod harness;
mod memberships;
mod tasks;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    clock::monotonic_now,
    db::DbPool,
    db::cursor::truncate_to_millis,
    models::{Channel, Conversation, ConversationGroup, Entry},
};

/// Insert a root conversation owned by `owner` and return it.
pub async fn seed_conversation(db: &DbPool, owner: &str) -> Conversation {
    let now = truncate_to_millis(Utc::now());
    let group = ConversationGroup {
        id: Uuid::new_v4(),
        owner_user_id: owner.to_string(),
        created_at: now,
        deleted_at: None,
    };
    let conversation = Conversation {
        id: Uuid::new_v4(),
        group_id: group.id,
        owner_user_id: owner.to_string(),
        title: Some("seeded".to_string()),
        metadata: Default::default(),
        forked_at_conversation_id: None,
        forked_at_entry_id: None,
        created_at: now,
        updated_at: now,
    };
    db.conversations()
        .create_root(group, conversation)
        .await
        .expect("seed conversation")
}

/// Build a history entry row for tests, stamped from the monotonic clock
/// like production writes.
pub fn history_entry(conversation: &Conversation, user: &str, text: &str) -> Entry {
    Entry {
        id: Uuid::now_v7(),
        conversation_id: conversation.id,
        group_id: conversation.group_id,
        channel: Channel::History,
        content_type: "history".to_string(),
        epoch: None,
        client_id: None,
        user_id: Some(user.to_string()),
        content: serde_json::json!([{ "text": text }]),
        indexed_content: Some(text.to_string()),
        created_at: truncate_to_millis(monotonic_now()),
        indexed_at: None,
    }
}

/// Build a memory entry row at the given epoch.
pub fn memory_entry(
    conversation: &Conversation,
    client: &str,
    epoch: i64,
    content: serde_json::Value,
) -> Entry {
    Entry {
        id: Uuid::now_v7(),
        conversation_id: conversation.id,
        group_id: conversation.group_id,
        channel: Channel::Memory,
        content_type: "memory".to_string(),
        epoch: Some(epoch),
        client_id: Some(client.to_string()),
        user_id: Some("agent-user".to_string()),
        content,
        indexed_content: None,
        created_at: truncate_to_millis(monotonic_now()),
        indexed_at: None,
    }
}
