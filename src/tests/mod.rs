//! Service-level scenario tests over an in-memory SQLite database: the
//! memory-sync lifecycle, fork + delete cascade, cross-fork attachment
//! reuse with blob reference counting, ownership transfers, and the upload
//! size limit.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::Subject,
    config::{AuthConfig, BlobStoreConfig},
    crypto::PlainEncryption,
    db::{DbPool, tests::harness},
    models::{
        AccessLevel, AppendEntries, Channel, CreateConversation, CreateTransfer, EntryQuery,
        EpochFilter, ForkConversation, NewEntry, ShareRequest, SyncMemory, TransferStatus,
    },
    services::{
        AccessPolicy, AttachmentService, BlobStream, ConversationService, DatabaseBlobStore,
        DownloadTokenSigner, EntryService, MembershipService, ServiceError, collect_stream,
    },
};

struct TestEnv {
    db: Arc<DbPool>,
    conversations: ConversationService,
    entries: EntryService,
    memberships: MembershipService,
    attachments: AttachmentService,
}

async fn test_env() -> TestEnv {
    test_env_with_storage(BlobStoreConfig::default()).await
}

async fn test_env_with_storage(storage: BlobStoreConfig) -> TestEnv {
    let db = Arc::new(harness::sqlite_db().await);
    let auth = AuthConfig {
        indexer_clients: vec!["indexer-bot".to_string()],
        ..Default::default()
    };
    let access = Arc::new(AccessPolicy::new(Arc::clone(&db), auth));
    let encryption = Arc::new(PlainEncryption);
    let blob_store = Arc::new(DatabaseBlobStore::new(Arc::clone(&db)));
    let signer = Arc::new(DownloadTokenSigner::new(None).unwrap());

    TestEnv {
        conversations: ConversationService::new(Arc::clone(&db), Arc::clone(&access)),
        entries: EntryService::new(
            Arc::clone(&db),
            Arc::clone(&access),
            encryption.clone(),
            chrono::Duration::minutes(1),
        ),
        memberships: MembershipService::new(Arc::clone(&db), Arc::clone(&access)),
        attachments: AttachmentService::new(
            Arc::clone(&db),
            access,
            blob_store,
            signer,
            storage,
        ),
        db,
    }
}

fn alice() -> Subject {
    Subject::user("alice")
}

fn agent(client: &str) -> Subject {
    Subject::with_client("alice", client)
}

fn bytes_stream(data: &'static [u8]) -> BlobStream {
    Box::pin(futures::stream::once(async move { Ok(Bytes::from_static(data)) }))
}

fn history(text: &str) -> AppendEntries {
    AppendEntries {
        entries: vec![NewEntry {
            channel: Channel::History,
            content_type: "history".to_string(),
            content: vec![json!({ "text": text, "role": "USER" })],
            epoch: None,
            indexed_content: Some(text.to_string()),
        }],
    }
}

fn window(texts: &[&str]) -> SyncMemory {
    SyncMemory {
        content_type: "memory".to_string(),
        content: texts.iter().map(|t| json!({ "text": t })).collect(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory sync lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn memory_sync_lifecycle() {
    let env = test_env().await;
    let agent = agent("agent-1");
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    // First window opens epoch 1.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&["A"]))
        .await
        .unwrap();
    assert!(!outcome.no_op);
    assert!(outcome.epoch_incremented);
    assert_eq!(outcome.epoch, 1);

    // Identical window: no-op, same epoch.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&["A"]))
        .await
        .unwrap();
    assert!(outcome.no_op);
    assert_eq!(outcome.epoch, 1);

    // Prefix extension: one delta entry, still epoch 1.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&["A", "B"]))
        .await
        .unwrap();
    assert!(!outcome.no_op);
    assert!(!outcome.epoch_incremented);
    assert_eq!(outcome.epoch, 1);
    let delta = outcome.entry.unwrap();
    assert_eq!(delta.content, json!([{ "text": "B" }]));

    // Divergence bumps to epoch 2 with the full window.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&["C"]))
        .await
        .unwrap();
    assert!(outcome.epoch_incremented);
    assert_eq!(outcome.epoch, 2);
    assert_eq!(outcome.entry.unwrap().content, json!([{ "text": "C" }]));

    // Clear: epoch 3 with empty content.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&[]))
        .await
        .unwrap();
    assert!(outcome.epoch_incremented);
    assert_eq!(outcome.epoch, 3);

    // Clearing the already-empty window is a no-op.
    let outcome = env
        .entries
        .sync_memory(&agent, conversation.id, window(&[]))
        .await
        .unwrap();
    assert!(outcome.no_op);
    assert_eq!(outcome.epoch, 3);

    // The latest-epoch read sees exactly the current (empty) window.
    let latest = env
        .entries
        .list(
            &agent,
            conversation.id,
            EntryQuery {
                channel: Some(Channel::Memory),
                epoch: EpochFilter::Latest,
                client_id: Some("agent-1".to_string()),
                all_forks: false,
            },
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].epoch, Some(3));
    assert_eq!(latest.items[0].content, json!([]));
}

#[tokio::test]
async fn memory_epochs_are_client_scoped() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    env.entries
        .sync_memory(&agent("agent-1"), conversation.id, window(&["A"]))
        .await
        .unwrap();
    let outcome = env
        .entries
        .sync_memory(&agent("agent-2"), conversation.id, window(&["X"]))
        .await
        .unwrap();

    // Each client starts its own epoch series.
    assert_eq!(outcome.epoch, 1);
}

#[tokio::test]
async fn sync_requires_a_client_id() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let result = env
        .entries
        .sync_memory(&alice(), conversation.id, window(&["A"]))
        .await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Fork + delete cascade
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn fork_then_delete_cascades_to_the_whole_group() {
    let env = test_env().await;
    let root = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    env.entries
        .append(&alice(), root.id, history("e1"))
        .await
        .unwrap();
    let e2 = env
        .entries
        .append(&alice(), root.id, history("e2"))
        .await
        .unwrap()
        .remove(0);

    let fork = env
        .conversations
        .fork(
            &alice(),
            root.id,
            ForkConversation {
                entry_id: e2.id,
                title: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(fork.group_id, root.group_id);

    // Deleting the root soft-deletes the whole group.
    env.conversations.delete(&alice(), root.id).await.unwrap();
    assert!(matches!(
        env.conversations.get(&alice(), root.id).await,
        Err(ServiceError::NotFound)
    ));
    assert!(matches!(
        env.conversations.get(&alice(), fork.id).await,
        Err(ServiceError::NotFound)
    ));

    // Rows remain, with the group's deleted_at set.
    let group = env
        .db
        .conversations()
        .get_group(root.group_id)
        .await
        .unwrap()
        .unwrap();
    assert!(group.deleted_at.is_some());
    assert!(
        env.db
            .conversations()
            .get_including_deleted(fork.id)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn fork_sees_exactly_the_parent_prefix() {
    let env = test_env().await;
    let root = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let e1 = env
        .entries
        .append(&alice(), root.id, history("one"))
        .await
        .unwrap()
        .remove(0);
    let e2 = env
        .entries
        .append(&alice(), root.id, history("two"))
        .await
        .unwrap()
        .remove(0);

    let fork = env
        .conversations
        .fork(
            &alice(),
            root.id,
            ForkConversation {
                entry_id: e2.id,
                title: None,
            },
        )
        .await
        .unwrap();

    // The fork entry itself is excluded; nothing of the fork's own yet.
    let listed = env
        .entries
        .list(
            &alice(),
            fork.id,
            EntryQuery {
                all_forks: true,
                ..Default::default()
            },
            Default::default(),
        )
        .await
        .unwrap();
    let ids: Vec<Uuid> = listed.items.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec![e1.id]);

    // Appends to the fork do not leak into the parent's chain.
    env.entries
        .append(&alice(), fork.id, history("fork-own"))
        .await
        .unwrap();
    let parent_entries = env
        .entries
        .list(&alice(), root.id, EntryQuery::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(parent_entries.items.len(), 2);
}

#[tokio::test]
async fn fork_requires_owned_user_authored_history_entry() {
    let env = test_env().await;
    let root = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    // A stranger has no membership at all: not even visible.
    let stranger_append = env
        .entries
        .append(&Subject::user("mallory"), root.id, history("not yours"))
        .await;
    assert!(matches!(stranger_append, Err(ServiceError::NotFound)));

    let entry = env
        .entries
        .append(&alice(), root.id, history("mine"))
        .await
        .unwrap()
        .remove(0);

    // A writer sharee cannot fork; forking needs owner access.
    env.memberships
        .share(
            &alice(),
            root.id,
            ShareRequest {
                user_id: "bob".to_string(),
                access_level: AccessLevel::Writer,
            },
        )
        .await
        .unwrap();
    let result = env
        .conversations
        .fork(
            &Subject::user("bob"),
            root.id,
            ForkConversation {
                entry_id: entry.id,
                title: None,
            },
        )
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

// ─────────────────────────────────────────────────────────────────────────────
// Attachments
// ─────────────────────────────────────────────────────────────────────────────

fn attachment_reference(id: Uuid) -> AppendEntries {
    AppendEntries {
        entries: vec![NewEntry {
            channel: Channel::History,
            content_type: "history".to_string(),
            content: vec![json!({
                "text": "see attachment",
                "attachments": [{ "attachmentId": id.to_string() }],
            })],
            epoch: None,
            indexed_content: None,
        }],
    }
}

#[tokio::test]
async fn attachment_reuse_across_forks_shares_the_blob() {
    let env = test_env().await;
    let root = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let uploaded = env
        .attachments
        .upload(
            &alice(),
            crate::models::CreateAttachment {
                content_type: "text/plain".to_string(),
                filename: Some("note.txt".to_string()),
                expires_in_secs: None,
            },
            bytes_stream(b"shared bytes"),
        )
        .await
        .unwrap();
    let storage_key = uploaded.storage_key.clone().unwrap();

    // Link into the root; the reference is rewritten to an href.
    let entry = env
        .entries
        .append(&alice(), root.id, attachment_reference(uploaded.id))
        .await
        .unwrap()
        .remove(0);
    let reference = &entry.content[0]["attachments"][0];
    assert!(reference.get("attachmentId").is_none());
    assert_eq!(
        reference["href"],
        format!("/v1/attachments/{}", uploaded.id)
    );
    assert_eq!(reference["contentType"], "text/plain");

    // Fork and reference the same attachment id from the fork.
    let fork = env
        .conversations
        .fork(
            &alice(),
            root.id,
            ForkConversation {
                entry_id: entry.id,
                title: None,
            },
        )
        .await
        .unwrap();
    let fork_entry = env
        .entries
        .append(&alice(), fork.id, attachment_reference(uploaded.id))
        .await
        .unwrap()
        .remove(0);

    // The server allocated a new row sharing the source blob.
    let fork_ref = &fork_entry.content[0]["attachments"][0];
    let copy_id: Uuid = fork_ref["href"]
        .as_str()
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .parse()
        .unwrap();
    assert_ne!(copy_id, uploaded.id);

    let copy = env.attachments.get(&alice(), copy_id).await.unwrap();
    assert_eq!(copy.storage_key.as_deref(), Some(storage_key.as_str()));
    assert_eq!(
        env.db
            .attachments()
            .count_live_by_storage_key(&storage_key)
            .await
            .unwrap(),
        2
    );

    // Deleting the original keeps the blob: the copy still references it.
    env.attachments.delete(&alice(), uploaded.id).await.unwrap();
    let still_there = env.attachments.download(&alice(), copy_id).await.unwrap();
    assert_eq!(collect_stream(still_there.1).await.unwrap(), b"shared bytes");

    // Deleting the last reference removes the blob.
    env.attachments.delete(&alice(), copy_id).await.unwrap();
    assert_eq!(
        env.db
            .attachments()
            .count_live_by_storage_key(&storage_key)
            .await
            .unwrap(),
        0
    );
    let blob_store = DatabaseBlobStore::new(Arc::clone(&env.db));
    assert!(
        crate::services::BlobStore::retrieve(&blob_store, &storage_key)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn attachments_never_cross_group_boundaries() {
    let env = test_env().await;
    let first = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();
    let second = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let uploaded = env
        .attachments
        .upload(
            &alice(),
            crate::models::CreateAttachment {
                content_type: "text/plain".to_string(),
                filename: None,
                expires_in_secs: None,
            },
            bytes_stream(b"group-bound"),
        )
        .await
        .unwrap();

    env.entries
        .append(&alice(), first.id, attachment_reference(uploaded.id))
        .await
        .unwrap();

    // Linked in group A; referencing it from group B is forbidden.
    let result = env
        .entries
        .append(&alice(), second.id, attachment_reference(uploaded.id))
        .await;
    assert!(matches!(result, Err(ServiceError::Forbidden(_))));
}

#[tokio::test]
async fn upload_size_limit_leaves_no_residue() {
    let storage = BlobStoreConfig {
        max_attachment_bytes: 100,
        ..Default::default()
    };
    let env = test_env_with_storage(storage).await;

    let oversized: &'static [u8] = Box::leak(vec![0u8; 101].into_boxed_slice());
    let result = env
        .attachments
        .upload(
            &alice(),
            crate::models::CreateAttachment {
                content_type: "application/octet-stream".to_string(),
                filename: None,
                expires_in_secs: None,
            },
            bytes_stream(oversized),
        )
        .await;
    assert!(matches!(
        result,
        Err(ServiceError::FileTooLarge { max: 100 })
    ));

    // No metadata row and no blob chunks survive.
    use sqlx::Row;
    match env.db.pool() {
        crate::db::DbPoolRef::Sqlite(pool) => {
            let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM attachments")
                .fetch_one(pool)
                .await
                .unwrap()
                .get("n");
            assert_eq!(rows, 0);
            let chunks: i64 = sqlx::query("SELECT COUNT(*) AS n FROM attachment_file_chunks")
                .fetch_one(pool)
                .await
                .unwrap()
                .get("n");
            assert_eq!(chunks, 0);
        }
        #[cfg(feature = "database-postgres")]
        _ => unreachable!("test runs on sqlite"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sharing & ownership transfer
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ownership_transfer_flow() {
    let env = test_env().await;
    let bob = Subject::user("bob");
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    env.memberships
        .share(
            &alice(),
            conversation.id,
            ShareRequest {
                user_id: "bob".to_string(),
                access_level: AccessLevel::Reader,
            },
        )
        .await
        .unwrap();

    let transfer = env
        .memberships
        .create_transfer(
            &alice(),
            conversation.id,
            CreateTransfer {
                to_user_id: "bob".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);

    // A second transfer while one is pending conflicts.
    let second = env
        .memberships
        .create_transfer(
            &alice(),
            conversation.id,
            CreateTransfer {
                to_user_id: "carol".to_string(),
            },
        )
        .await;
    assert!(matches!(second, Err(ServiceError::Conflict(_))));

    // Only the proposed owner may accept.
    let wrong_acceptor = env.memberships.accept_transfer(&alice(), transfer.id).await;
    assert!(matches!(wrong_acceptor, Err(ServiceError::Forbidden(_))));

    let accepted = env
        .memberships
        .accept_transfer(&bob, transfer.id)
        .await
        .unwrap();
    assert_eq!(accepted.status, TransferStatus::Accepted);

    let memberships = env.memberships.list(&bob, conversation.id).await.unwrap();
    let level_of = |user: &str| {
        memberships
            .iter()
            .find(|m| m.user_id == user)
            .map(|m| m.access_level)
    };
    assert_eq!(level_of("bob"), Some(AccessLevel::Owner));
    assert_eq!(level_of("alice"), Some(AccessLevel::Writer));

    // bob now owns delete; alice no longer does.
    assert!(matches!(
        env.conversations.delete(&alice(), conversation.id).await,
        Err(ServiceError::Forbidden(_))
    ));
    env.conversations.delete(&bob, conversation.id).await.unwrap();
}

#[tokio::test]
async fn readers_cannot_write() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();
    env.memberships
        .share(
            &alice(),
            conversation.id,
            ShareRequest {
                user_id: "bob".to_string(),
                access_level: AccessLevel::Reader,
            },
        )
        .await
        .unwrap();

    let bob = Subject::user("bob");
    assert!(matches!(
        env.entries.append(&bob, conversation.id, history("nope")).await,
        Err(ServiceError::Forbidden(_))
    ));
    // But reading works.
    env.entries
        .list(&bob, conversation.id, EntryQuery::default(), Default::default())
        .await
        .unwrap();
    // And an agent acting for bob may still write memory.
    env.entries
        .sync_memory(
            &Subject::with_client("bob", "bobs-agent"),
            conversation.id,
            window(&["B"]),
        )
        .await
        .unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel rules
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn transcript_channel_requires_indexer_role() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let plain_agent = env
        .entries
        .index_transcript(
            &agent("agent-1"),
            conversation.id,
            "transcript".to_string(),
            vec![json!({ "summary": "..." })],
            Some("summary text".to_string()),
        )
        .await;
    assert!(matches!(plain_agent, Err(ServiceError::Forbidden(_))));

    let entry = env
        .entries
        .index_transcript(
            &agent("indexer-bot"),
            conversation.id,
            "transcript".to_string(),
            vec![json!({ "summary": "..." })],
            Some("summary text".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(entry.channel, Channel::Transcript);
}

#[tokio::test]
async fn default_listing_returns_history_only() {
    let env = test_env().await;
    let agent = agent("agent-1");
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    env.entries
        .append(&alice(), conversation.id, history("visible"))
        .await
        .unwrap();
    env.entries
        .sync_memory(&agent, conversation.id, window(&["hidden"]))
        .await
        .unwrap();

    let listed = env
        .entries
        .list(&alice(), conversation.id, EntryQuery::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].channel, Channel::History);
}

#[tokio::test]
async fn history_content_round_trips_verbatim() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let content = json!({
        "text": "unicode ✓ and nested",
        "events": [{ "kind": "tool_call", "payload": { "depth": [1, 2, 3] } }],
        "role": "AI",
    });
    env.entries
        .append(
            &alice(),
            conversation.id,
            AppendEntries {
                entries: vec![NewEntry {
                    channel: Channel::History,
                    content_type: "history/rich".to_string(),
                    content: vec![content.clone()],
                    epoch: None,
                    indexed_content: None,
                }],
            },
        )
        .await
        .unwrap();

    let listed = env
        .entries
        .list(&alice(), conversation.id, EntryQuery::default(), Default::default())
        .await
        .unwrap();
    assert_eq!(listed.items[0].content, json!([content]));
    assert_eq!(listed.items[0].content_type, "history/rich");
}

#[tokio::test]
async fn recorded_output_lands_as_a_transcript_entry() {
    let env = test_env().await;
    let conversation = env
        .conversations
        .create(&alice(), CreateConversation::default())
        .await
        .unwrap();

    let sink = crate::services::RecordedOutputSink::new(
        Arc::clone(&env.db),
        Arc::new(PlainEncryption),
    );
    crate::recorder::CompletionSink::persist(
        &sink,
        conversation.id,
        Some("alice".to_string()),
        Some("chat-backend".to_string()),
        "partial generation".to_string(),
    )
    .await
    .unwrap();

    let listed = env
        .entries
        .list(
            &alice(),
            conversation.id,
            EntryQuery {
                channel: Some(Channel::Transcript),
                ..Default::default()
            },
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    let entry = &listed.items[0];
    assert_eq!(
        entry.content,
        json!([{ "text": "partial generation", "role": "AI" }])
    );
    assert_eq!(entry.client_id.as_deref(), Some("chat-backend"));
    assert_eq!(entry.user_id.as_deref(), Some("alice"));

    // The projection feeds the background indexer.
    let pending = env.db.entries().find_pending_vector_indexing(10).await.unwrap();
    assert!(pending.iter().any(|p| p.id == entry.id));

    // Persisting into a deleted conversation is a quiet no-op, not an
    // error: the stream may outlive the conversation.
    env.conversations.delete(&alice(), conversation.id).await.unwrap();
    crate::recorder::CompletionSink::persist(
        &sink,
        conversation.id,
        Some("alice".to_string()),
        None,
        "late output".to_string(),
    )
    .await
    .unwrap();
}
