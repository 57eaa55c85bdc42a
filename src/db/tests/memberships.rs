use chrono::Utc;
use uuid::Uuid;

use super::{harness, seed_conversation};
use crate::{
    db::{DbError, DbPool},
    models::{AccessLevel, ConversationMembership, OwnershipTransfer, TransferStatus},
};

fn membership(group_id: Uuid, user: &str, level: AccessLevel) -> ConversationMembership {
    ConversationMembership {
        group_id,
        user_id: user.to_string(),
        access_level: level,
        created_at: Utc::now(),
    }
}

fn pending_transfer(group_id: Uuid, from: &str, to: &str) -> OwnershipTransfer {
    OwnershipTransfer {
        id: Uuid::new_v4(),
        group_id,
        from_user_id: from.to_string(),
        to_user_id: to.to_string(),
        status: TransferStatus::Pending,
        created_at: Utc::now(),
    }
}

async fn upsert_updates_level_in_place(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let group_id = conversation.group_id;

    db.memberships()
        .upsert(membership(group_id, "bob", AccessLevel::Reader))
        .await
        .unwrap();
    db.memberships()
        .upsert(membership(group_id, "bob", AccessLevel::Writer))
        .await
        .unwrap();

    let stored = db.memberships().get(group_id, "bob").await.unwrap().unwrap();
    assert_eq!(stored.access_level, AccessLevel::Writer);

    // Owner + sharee.
    assert_eq!(db.memberships().list_for_group(group_id).await.unwrap().len(), 2);

    db.memberships().delete(group_id, "bob").await.unwrap();
    assert!(db.memberships().get(group_id, "bob").await.unwrap().is_none());
    assert!(matches!(
        db.memberships().delete(group_id, "bob").await,
        Err(DbError::NotFound)
    ));
}

async fn readable_groups_exclude_soft_deleted(db: &DbPool) {
    let live = seed_conversation(db, "alice").await;
    let doomed = seed_conversation(db, "alice").await;

    db.conversations()
        .soft_delete_group(doomed.group_id, Utc::now())
        .await
        .unwrap();

    let readable = db.memberships().readable_group_ids("alice").await.unwrap();
    assert_eq!(readable, vec![live.group_id]);
}

async fn second_pending_transfer_conflicts(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let group_id = conversation.group_id;

    db.transfers()
        .create(pending_transfer(group_id, "alice", "bob"))
        .await
        .unwrap();

    let second = db
        .transfers()
        .create(pending_transfer(group_id, "alice", "carol"))
        .await;
    assert!(matches!(second, Err(DbError::Conflict(_))));
}

async fn accept_rewrites_owner_and_demotes_previous(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let group_id = conversation.group_id;

    db.memberships()
        .upsert(membership(group_id, "bob", AccessLevel::Reader))
        .await
        .unwrap();
    let transfer = db
        .transfers()
        .create(pending_transfer(group_id, "alice", "bob"))
        .await
        .unwrap();

    let accepted = db.transfers().accept(transfer.id).await.unwrap();
    assert_eq!(accepted.status, TransferStatus::Accepted);

    let group = db.conversations().get_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.owner_user_id, "bob");

    let bob = db.memberships().get(group_id, "bob").await.unwrap().unwrap();
    assert_eq!(bob.access_level, AccessLevel::Owner);
    let alice = db.memberships().get(group_id, "alice").await.unwrap().unwrap();
    assert_eq!(alice.access_level, AccessLevel::Writer);

    // Exactly one owner per group.
    let owners = db
        .memberships()
        .list_for_group(group_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|m| m.access_level == AccessLevel::Owner)
        .count();
    assert_eq!(owners, 1);

    // Accepting twice is a conflict.
    assert!(matches!(
        db.transfers().accept(transfer.id).await,
        Err(DbError::Conflict(_))
    ));

    // The group is free for a new transfer now.
    db.transfers()
        .create(pending_transfer(group_id, "bob", "alice"))
        .await
        .unwrap();
}

async fn cancel_only_works_while_pending(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    let transfer = db
        .transfers()
        .create(pending_transfer(conversation.group_id, "alice", "bob"))
        .await
        .unwrap();

    let cancelled = db.transfers().cancel(transfer.id).await.unwrap();
    assert_eq!(cancelled.status, TransferStatus::Cancelled);

    assert!(matches!(
        db.transfers().cancel(transfer.id).await,
        Err(DbError::Conflict(_))
    ));
    assert!(matches!(
        db.transfers().cancel(Uuid::new_v4()).await,
        Err(DbError::NotFound)
    ));

    assert!(
        db.transfers()
            .find_pending_for_group(conversation.group_id)
            .await
            .unwrap()
            .is_none()
    );
}

async fn list_for_user_returns_both_directions(db: &DbPool) {
    let outgoing = seed_conversation(db, "alice").await;
    let incoming = seed_conversation(db, "carol").await;

    db.transfers()
        .create(pending_transfer(outgoing.group_id, "alice", "bob"))
        .await
        .unwrap();
    db.transfers()
        .create(pending_transfer(incoming.group_id, "carol", "alice"))
        .await
        .unwrap();

    let for_alice = db.transfers().list_for_user("alice").await.unwrap();
    assert_eq!(for_alice.len(), 2);
    let for_bob = db.transfers().list_for_user("bob").await.unwrap();
    assert_eq!(for_bob.len(), 1);
}

// ==================== SQLite ====================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn upsert() {
        upsert_updates_level_in_place(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn readable_groups() {
        readable_groups_exclude_soft_deleted(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn pending_conflict() {
        second_pending_transfer_conflicts(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn accept() {
        accept_rewrites_owner_and_demotes_previous(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn cancel() {
        cancel_only_works_while_pending(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn list_for_user() {
        list_for_user_returns_both_directions(&harness::sqlite_db().await).await;
    }
}

// ==================== PostgreSQL ====================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn pending_conflict() {
        second_pending_transfer_conflicts(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn accept() {
        accept_rewrites_owner_and_demotes_previous(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn cancel() {
        cancel_only_works_while_pending(&harness::postgres::postgres_db().await).await;
    }
}
