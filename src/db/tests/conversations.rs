use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{harness, seed_conversation};
use crate::{
    db::{DbError, DbPool, ListParams},
    models::{AccessLevel, Conversation, ListMode},
};

async fn create_root_creates_group_and_owner_membership(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    let group = db
        .conversations()
        .get_group(conversation.group_id)
        .await
        .unwrap()
        .expect("group exists");
    assert_eq!(group.owner_user_id, "alice");
    assert!(group.deleted_at.is_none());

    let membership = db
        .memberships()
        .get(conversation.group_id, "alice")
        .await
        .unwrap()
        .expect("owner membership exists");
    assert_eq!(membership.access_level, AccessLevel::Owner);
}

async fn soft_delete_cascades_and_hard_deletes_memberships(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    // A fork in the same group disappears with it.
    let fork = Conversation {
        id: Uuid::new_v4(),
        forked_at_conversation_id: Some(conversation.id),
        created_at: conversation.created_at + Duration::milliseconds(5),
        updated_at: conversation.updated_at + Duration::milliseconds(5),
        ..conversation.clone()
    };
    db.conversations().create_fork(fork.clone()).await.unwrap();

    db.conversations()
        .soft_delete_group(conversation.group_id, Utc::now())
        .await
        .unwrap();

    assert!(db.conversations().get(conversation.id).await.unwrap().is_none());
    assert!(db.conversations().get(fork.id).await.unwrap().is_none());
    // Rows stay for admin paths.
    assert!(
        db.conversations()
            .get_including_deleted(conversation.id)
            .await
            .unwrap()
            .is_some()
    );
    // Memberships are hard-deleted, not tombstoned.
    assert!(
        db.memberships()
            .get(conversation.group_id, "alice")
            .await
            .unwrap()
            .is_none()
    );
    let group = db
        .conversations()
        .get_group(conversation.group_id)
        .await
        .unwrap()
        .unwrap();
    assert!(group.deleted_at.is_some());
}

async fn list_modes_filter_forks(db: &DbPool) {
    let root = seed_conversation(db, "alice").await;
    let fork = Conversation {
        id: Uuid::new_v4(),
        forked_at_conversation_id: Some(root.id),
        created_at: root.created_at + Duration::milliseconds(10),
        updated_at: root.updated_at + Duration::milliseconds(10),
        ..root.clone()
    };
    db.conversations().create_fork(fork.clone()).await.unwrap();

    let all = db
        .conversations()
        .list_for_user("alice", ListMode::All, ListParams::default())
        .await
        .unwrap();
    assert_eq!(all.items.len(), 2);

    let roots = db
        .conversations()
        .list_for_user("alice", ListMode::Roots, ListParams::default())
        .await
        .unwrap();
    assert_eq!(roots.items.len(), 1);
    assert_eq!(roots.items[0].id, root.id);

    // latest-fork keeps only the most recently updated conversation per
    // group; the fork has the later updated_at.
    let latest = db
        .conversations()
        .list_for_user("alice", ListMode::LatestFork, ListParams::default())
        .await
        .unwrap();
    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].id, fork.id);
}

async fn listing_is_scoped_by_membership(db: &DbPool) {
    let mine = seed_conversation(db, "alice").await;
    seed_conversation(db, "bob").await;

    let listed = db
        .conversations()
        .list_for_user("alice", ListMode::All, ListParams::default())
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].id, mine.id);
}

async fn cursor_pagination_walks_the_full_set(db: &DbPool) {
    for _ in 0..5 {
        seed_conversation(db, "alice").await;
    }

    let first_page = db
        .conversations()
        .list_for_user(
            "alice",
            ListMode::All,
            ListParams {
                limit: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first_page.items.len(), 2);
    assert!(first_page.has_more);

    let mut seen: Vec<Uuid> = first_page.items.iter().map(|c| c.id).collect();
    let mut cursor = first_page.cursors.next;
    while let Some(next) = cursor {
        let page = db
            .conversations()
            .list_for_user(
                "alice",
                ListMode::All,
                ListParams {
                    limit: Some(2),
                    cursor: Some(next),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        seen.extend(page.items.iter().map(|c| c.id));
        cursor = page.cursors.next;
    }

    assert_eq!(seen.len(), 5);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5, "pagination must not repeat rows");
}

async fn update_touches_updated_at_and_rejects_missing(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;

    let updated = db
        .conversations()
        .update(conversation.id, Some("renamed".into()), None)
        .await
        .unwrap();
    assert_eq!(updated.title.as_deref(), Some("renamed"));
    assert!(updated.updated_at >= conversation.updated_at);
    // Metadata untouched by a title-only update.
    assert_eq!(updated.metadata, conversation.metadata);

    let missing = db
        .conversations()
        .update(Uuid::new_v4(), Some("x".into()), None)
        .await;
    assert!(matches!(missing, Err(DbError::NotFound)));
}

async fn eviction_queries_find_and_purge_expired_groups(db: &DbPool) {
    let conversation = seed_conversation(db, "alice").await;
    db.entries()
        .append(
            conversation.id,
            vec![super::history_entry(&conversation, "alice", "hello")],
            Vec::new(),
        )
        .await
        .unwrap();

    db.conversations()
        .soft_delete_group(conversation.group_id, Utc::now() - Duration::days(40))
        .await
        .unwrap();

    let due = db
        .conversations()
        .find_groups_deleted_before(Utc::now() - Duration::days(30), 10)
        .await
        .unwrap();
    assert_eq!(due, vec![conversation.group_id]);

    // Not yet due with a longer retention cutoff.
    let not_due = db
        .conversations()
        .find_groups_deleted_before(Utc::now() - Duration::days(60), 10)
        .await
        .unwrap();
    assert!(not_due.is_empty());

    let counts = db
        .conversations()
        .hard_delete_group(conversation.group_id)
        .await
        .unwrap();
    assert_eq!(counts.entries, 1);
    assert_eq!(counts.conversations, 1);
    assert!(
        db.conversations()
            .get_including_deleted(conversation.id)
            .await
            .unwrap()
            .is_none()
    );
}

// ==================== SQLite ====================

#[cfg(feature = "database-sqlite")]
mod sqlite_tests {
    use super::*;

    #[tokio::test]
    async fn create_root() {
        create_root_creates_group_and_owner_membership(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn soft_delete_cascade() {
        soft_delete_cascades_and_hard_deletes_memberships(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn list_modes() {
        list_modes_filter_forks(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn membership_scoping() {
        listing_is_scoped_by_membership(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn cursor_pagination() {
        cursor_pagination_walks_the_full_set(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn update() {
        update_touches_updated_at_and_rejects_missing(&harness::sqlite_db().await).await;
    }

    #[tokio::test]
    async fn eviction_queries() {
        eviction_queries_find_and_purge_expired_groups(&harness::sqlite_db().await).await;
    }
}

// ==================== PostgreSQL ====================

#[cfg(feature = "database-postgres")]
mod postgres_tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn create_root() {
        create_root_creates_group_and_owner_membership(&harness::postgres::postgres_db().await)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn soft_delete_cascade() {
        soft_delete_cascades_and_hard_deletes_memberships(&harness::postgres::postgres_db().await)
            .await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn list_modes() {
        list_modes_filter_forks(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn cursor_pagination() {
        cursor_pagination_walks_the_full_set(&harness::postgres::postgres_db().await).await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker.
    async fn eviction_queries() {
        eviction_queries_find_and_purge_expired_groups(&harness::postgres::postgres_db().await)
            .await;
    }
}
