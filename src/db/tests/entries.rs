use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use super::{harness, history_entry, memory_entry, seed_conversation};
use crate::{
    db::{AttachmentLink, DbPool, EntryFilter, EntryScope, ListParams},
    models::{Attachment, Channel, Conversation, EpochFilter},
};

async fn append_bumps_updated_at_and_preserves_order(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let before = conversation.updated_at;

    let entries = vec![
        history_entry(&conversation, "alice", "first"),
        history_entry(&conversation, "alice", "second"),
        history_entry(&conversation, "alice", "third"),
    ];
    db.entries()
        .append(conversation.id, entries, Vec::new())
        .await
        .unwrap();

    let listed = db
        .entries()
        .list(
            EntryScope::conversation(conversation.id),
            EntryFilter {
                channel: Some(Channel::History),
                ..Default::default()
            },
            ListParams::default(),
        )
        .await
        .unwrap();

    let texts: Vec<&str> = listed
        .items
        .iter()
        .map(|entry| entry.content[0]["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);

    let after = db
        .conversations()
        .get(conversation.id)
        .await
        .unwrap()
        .unwrap()
        .updated_at;
    assert!(after >= before);
}

async fn latest_epoch_filter_returns_only_the_max_epoch(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    for (epoch, text) in [(1, "old-a"), (1, "old-b"), (2, "current")] {
        db.entries()
            .append(
                conversation.id,
                vec![memory_entry(
                    &conversation,
                    "agent-1",
                    epoch,
                    json!([{ "text": text }]),
                )],
                Vec::new(),
            )
            .await
            .unwrap();
    }
    // Another client's window must not leak in.
    db.entries()
        .append(
            conversation.id,
            vec![memory_entry(
                &conversation,
                "agent-2",
                7,
                json!([{ "text": "other" }]),
            )],
            Vec::new(),
        )
        .await
        .unwrap();

    let latest = db
        .entries()
        .list(
            EntryScope::conversation(conversation.id),
            EntryFilter {
                channel: Some(Channel::Memory),
                epoch: EpochFilter::Latest,
                client_id: Some("agent-1".to_string()),
            },
            ListParams::default(),
        )
        .await
        .unwrap();

    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].epoch, Some(2));
    assert_eq!(latest.items[0].content[0]["text"], "current");

    assert_eq!(
        db.entries()
            .latest_epoch(conversation.id, "agent-1")
            .await
            .unwrap(),
        Some(2)
    );
    assert_eq!(
        db.entries()
            .latest_epoch(conversation.id, "nobody")
            .await
            .unwrap(),
        None
    );
}

async fn group_prefix_scope_returns_fork_history(db: &DbPool) {
    let root = seed_conversation(db, "alice").await;

    let e1 = history_entry(&root, "alice", "one");
    let e2 = history_entry(&root, "alice", "two");
    let e3 = history_entry(&root, "alice", "three");
    db.entries()
        .append(root.id, vec![e1.clone(), e2.clone(), e3.clone()], Vec::new())
        .await
        .unwrap();

    // Fork at e3: prefix is strictly before it.
    let fork = Conversation {
        id: Uuid::new_v4(),
        forked_at_conversation_id: Some(root.id),
        forked_at_entry_id: Some(e3.id),
        ..root.clone()
    };
    db.conversations().create_fork(fork.clone()).await.unwrap();

    let fork_history = db
        .entries()
        .list(
            EntryScope {
                conversation_id: fork.id,
                group_prefix: Some((root.group_id, e3.created_at)),
            },
            EntryFilter {
                channel: Some(Channel::History),
                ..Default::default()
            },
            ListParams::default(),
        )
        .await
        .unwrap();

    let ids: Vec<Uuid> = fork_history.items.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![e1.id, e2.id]);

    // The fork's own appends show up after the inherited prefix.
    let f1 = history_entry(&fork, "alice", "fork-only");
    db.entries()
        .append(fork.id, vec![f1.clone()], Vec::new())
        .await
        .unwrap();

    let fork_history = db
        .entries()
        .list(
            EntryScope {
                conversation_id: fork.id,
                group_prefix: Some((root.group_id, e3.created_at)),
            },
            EntryFilter {
                channel: Some(Channel::History),
                ..Default::default()
            },
            ListParams::default(),
        )
        .await
        .unwrap();
    let ids: Vec<Uuid> = fork_history.items.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![e1.id, e2.id, f1.id]);
}

async fn append_links_attachments_in_the_same_transaction(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    let attachment = db
        .attachments()
        .create(Attachment {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            content_type: "image/png".to_string(),
            filename: Some("cat.png".to_string()),
            size_bytes: 3,
            sha256: Some("ab".repeat(32)),
            storage_key: Some("blob-key-1".to_string()),
            entry_id: None,
            expires_at: Some(Utc::now() + chrono::Duration::minutes(1)),
            created_at: Utc::now(),
            deleted_at: None,
        })
        .await
        .unwrap();

    let entry = history_entry(&conversation, "alice", "with attachment");
    db.entries()
        .append(
            conversation.id,
            vec![entry.clone()],
            vec![AttachmentLink {
                attachment_id: attachment.id,
                entry_id: entry.id,
            }],
        )
        .await
        .unwrap();

    let linked = db.attachments().get(attachment.id).await.unwrap().unwrap();
    assert_eq!(linked.entry_id, Some(entry.id));
    assert!(linked.expires_at.is_none(), "linking clears expiry");
}

async fn search_history_is_membership_scoped(db: &DbPool) {
    let mine = seed_conversation(db, "alice").await;
    let theirs = seed_conversation(db, "bob").await;

    db.entries()
        .append(
            mine.id,
            vec![history_entry(&mine, "alice", "the blue whale returns")],
            Vec::new(),
        )
        .await
        .unwrap();
    db.entries()
        .append(
            theirs.id,
            vec![history_entry(&theirs, "bob", "the blue whale hides")],
            Vec::new(),
        )
        .await
        .unwrap();

    let hits = db
        .entries()
        .search_history("alice", "whale", ListParams::default())
        .await
        .unwrap();
    assert_eq!(hits.items.len(), 1);
    assert_eq!(hits.items[0].conversation_id, mine.id);

    let no_hits = db
        .entries()
        .search_history("alice", "submarine", ListParams::default())
        .await
        .unwrap();
    assert!(no_hits.items.is_empty());
}

async fn pending_vector_indexing_lifecycle(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let entry = history_entry(&conversation, "alice", "index me");
    db.entries()
        .append(conversation.id, vec![entry.clone()], Vec::new())
        .await
        .unwrap();

    let pending = db.entries().find_pending_vector_indexing(10).await.unwrap();
    assert!(pending.iter().any(|p| p.id == entry.id));

    db.entries()
        .mark_indexed(&[entry.id], Utc::now())
        .await
        .unwrap();
    let pending = db.entries().find_pending_vector_indexing(10).await.unwrap();
    assert!(!pending.iter().any(|p| p.id == entry.id));
}

// ==================== SQLite ====================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn append_and_order() {
        append_bumps_updated_at_and_preserves_order(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn latest_epoch() {
        latest_epoch_filter_returns_only_the_max_epoch(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn fork_prefix() {
        group_prefix_scope_returns_fork_history(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn attachment_links() {
        append_links_attachments_in_the_same_transaction(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn search() {
        search_history_is_membership_scoped(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn vector_indexing_queue() {
        pending_vector_indexing_lifecycle(&harness::sqlite_db().await).await;
    }
}

// ==================== PostgreSQL ====================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn append_and_order() {
        append_bumps_updated_at_and_preserves_order(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn latest_epoch() {
        latest_epoch_filter_returns_only_the_max_epoch(&harness::postgres::postgres_db().await)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn fork_prefix() {
        group_prefix_scope_returns_fork_history(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn search() {
        search_history_is_membership_scoped(&harness::postgres::postgres_db().await).await;
    }
}
