use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{harness, history_entry, seed_conversation};
use crate::{
    db::{AttachmentLink, DbError, DbPool, RefcountDecision},
    models::Attachment,
};

fn unlinked_attachment(user: &str, storage_key: Option<&str>) -> Attachment {
    Attachment {
        id: Uuid::new_v4(),
        user_id: user.to_string(),
        content_type: "image/png".to_string(),
        filename: Some("cat.png".to_string()),
        size_bytes: 3,
        sha256: Some("ab".repeat(32)),
        storage_key: storage_key.map(String::from),
        entry_id: None,
        expires_at: Some(Utc::now() + Duration::minutes(5)),
        created_at: Utc::now(),
        deleted_at: None,
    }
}

async fn upload_lifecycle_round_trip(db: &DbPool) {
    let created = db
        .attachments()
        .create(unlinked_attachment("alice", None))
        .await
        .unwrap();
    assert!(created.storage_key.is_none());

    let finalized = db
        .attachments()
        .record_upload(
            created.id,
            "blob-1",
            1234,
            &"cd".repeat(32),
            Utc::now() + Duration::hours(1),
        )
        .await
        .unwrap();
    assert_eq!(finalized.storage_key.as_deref(), Some("blob-1"));
    assert_eq!(finalized.size_bytes, 1234);

    assert!(matches!(
        db.attachments()
            .record_upload(Uuid::new_v4(), "x", 1, "y", Utc::now())
            .await,
        Err(DbError::NotFound)
    ));
}

async fn refcount_delete_protocol(db: &DbPool) {
    // Two live rows share one storage key.
    let first = db
        .attachments()
        .create(unlinked_attachment("alice", Some("shared-blob")))
        .await
        .unwrap();
    let second = db
        .attachments()
        .create(unlinked_attachment("alice", Some("shared-blob")))
        .await
        .unwrap();

    assert_eq!(
        db.attachments()
            .count_live_by_storage_key("shared-blob")
            .await
            .unwrap(),
        2
    );

    // Deleting the first row retains the blob.
    assert_eq!(
        db.attachments().begin_refcount_delete(first.id).await.unwrap(),
        RefcountDecision::BlobRetained
    );
    assert!(db.attachments().get(first.id).await.unwrap().is_none());

    // The last reference soft-deletes and hands back the key.
    match db.attachments().begin_refcount_delete(second.id).await.unwrap() {
        RefcountDecision::BlobDeletable { storage_key } => {
            assert_eq!(storage_key, "shared-blob");
        }
        other => panic!("expected BlobDeletable, got {other:?}"),
    }

    // Soft-deleted: invisible to get, visible to the cleanup sweep.
    assert!(db.attachments().get(second.id).await.unwrap().is_none());
    let orphans = db.attachments().find_soft_deleted(10).await.unwrap();
    assert!(orphans.iter().any(|a| a.id == second.id));

    db.attachments().finish_delete(second.id).await.unwrap();
    let orphans = db.attachments().find_soft_deleted(10).await.unwrap();
    assert!(!orphans.iter().any(|a| a.id == second.id));

    assert_eq!(
        db.attachments()
            .count_live_by_storage_key("shared-blob")
            .await
            .unwrap(),
        0
    );
}

async fn delete_without_blob_is_immediate(db: &DbPool) {
    let row = db
        .attachments()
        .create(unlinked_attachment("alice", None))
        .await
        .unwrap();
    assert_eq!(
        db.attachments().begin_refcount_delete(row.id).await.unwrap(),
        RefcountDecision::NoBlob
    );
    assert!(matches!(
        db.attachments().begin_refcount_delete(row.id).await,
        Err(DbError::NotFound)
    ));
}

async fn expiry_sweep_only_sees_unlinked_rows(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    let mut expired = unlinked_attachment("alice", Some("blob-expired"));
    expired.expires_at = Some(Utc::now() - Duration::minutes(1));
    let expired = db.attachments().create(expired).await.unwrap();

    let mut linked = unlinked_attachment("alice", Some("blob-linked"));
    linked.expires_at = Some(Utc::now() - Duration::minutes(1));
    let linked = db.attachments().create(linked).await.unwrap();

    // Link the second one; linking clears expiry so it leaves the sweep.
    let entry = history_entry(&conversation, "alice", "holder");
    db.entries()
        .append(
            conversation.id,
            vec![entry.clone()],
            vec![AttachmentLink {
                attachment_id: linked.id,
                entry_id: entry.id,
            }],
        )
        .await
        .unwrap();

    let due: Vec<Uuid> = db
        .attachments()
        .find_expired(Utc::now(), 10)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert!(due.contains(&expired.id));
    assert!(!due.contains(&linked.id));

    assert_eq!(
        db.attachments().linked_group_id(linked.id).await.unwrap(),
        Some(conversation.group_id)
    );
    assert_eq!(
        db.attachments().linked_group_id(expired.id).await.unwrap(),
        None
    );

    let by_group: Vec<Uuid> = db
        .attachments()
        .list_by_group(conversation.group_id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(by_group, vec![linked.id]);
}

// ==================== SQLite ====================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn upload_lifecycle() {
        upload_lifecycle_round_trip(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn refcount_protocol() {
        refcount_delete_protocol(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn no_blob_delete() {
        delete_without_blob_is_immediate(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn expiry_sweep() {
        expiry_sweep_only_sees_unlinked_rows(&harness::sqlite_db().await).await;
    }
}

// ==================== PostgreSQL ====================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn refcount_protocol() {
        refcount_delete_protocol(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn expiry_sweep() {
        expiry_sweep_only_sees_unlinked_rows(&harness::postgres::postgres_db().await).await;
    }
}
