use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_json, parse_uuid, parse_uuid_opt};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{
            ConversationRepo, Cursor, GroupDeleteCounts, ListParams, ListResult, PageCursors,
        },
    },
    models::{Conversation, ConversationGroup, ListMode},
};

pub struct SqliteConversationRepo {
    pool: SqlitePool,
}

const CONVERSATION_COLUMNS: &str = "c.id, c.group_id, c.owner_user_id, c.title, c.metadata, \
     c.forked_at_conversation_id, c.forked_at_entry_id, c.created_at, c.updated_at";

impl SqliteConversationRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_conversation(row: &SqliteRow) -> DbResult<Conversation> {
        let metadata_json: String = row.get("metadata");
        let metadata = match parse_json(&metadata_json)? {
            serde_json::Value::Object(map) => map,
            _ => {
                return Err(DbError::Internal(
                    "conversation metadata is not a JSON object".to_string(),
                ));
            }
        };

        Ok(Conversation {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            owner_user_id: row.get("owner_user_id"),
            title: row.get("title"),
            metadata,
            forked_at_conversation_id: parse_uuid_opt(row.get("forked_at_conversation_id"))?,
            forked_at_entry_id: parse_uuid_opt(row.get("forked_at_entry_id"))?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn cursor_from_conversation(conv: &Conversation) -> Cursor {
        Cursor::new(conv.updated_at, conv.id)
    }

    /// Extra WHERE fragment selecting the conversations a list mode keeps.
    fn mode_filter(mode: ListMode) -> &'static str {
        match mode {
            ListMode::All => "",
            ListMode::Roots => "AND c.forked_at_conversation_id IS NULL",
            // Keep only the conversation that would sort first in its group
            // under the (updated_at, id) ordering.
            ListMode::LatestFork => {
                "AND NOT EXISTS (
                    SELECT 1 FROM conversations c2
                    WHERE c2.group_id = c.group_id AND c2.deleted_at IS NULL
                    AND (c2.updated_at > c.updated_at
                         OR (c2.updated_at = c.updated_at AND c2.id > c.id))
                )"
            }
        }
    }

    async fn insert_conversation(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        conv: &Conversation,
    ) -> DbResult<()> {
        let metadata_json = serde_json::to_string(&conv.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, group_id, owner_user_id, title, metadata,
                 forked_at_conversation_id, forked_at_entry_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(conv.id.to_string())
        .bind(conv.group_id.to_string())
        .bind(&conv.owner_user_id)
        .bind(&conv.title)
        .bind(&metadata_json)
        .bind(conv.forked_at_conversation_id.map(|id| id.to_string()))
        .bind(conv.forked_at_entry_id.map(|id| id.to_string()))
        .bind(conv.created_at)
        .bind(conv.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConversationRepo for SqliteConversationRepo {
    async fn create_root(
        &self,
        group: ConversationGroup,
        conversation: Conversation,
    ) -> DbResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversation_groups (id, owner_user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(group.id.to_string())
        .bind(&group.owner_user_id)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_conversation(&mut tx, &conversation).await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_memberships (group_id, user_id, access_level, created_at)
            VALUES (?, ?, 'owner', ?)
            "#,
        )
        .bind(group.id.to_string())
        .bind(&group.owner_user_id)
        .bind(group.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(conversation)
    }

    async fn create_fork(&self, conversation: Conversation) -> DbResult<Conversation> {
        let mut tx = self.pool.begin().await?;
        Self::insert_conversation(&mut tx, &conversation).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        let query = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            JOIN conversation_groups g ON g.id = c.group_id
            WHERE c.id = ? AND c.deleted_at IS NULL AND g.deleted_at IS NULL
            "#,
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn get_including_deleted(&self, id: Uuid) -> DbResult<Option<Conversation>> {
        let query = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_conversation).transpose()
    }

    async fn get_group(&self, group_id: Uuid) -> DbResult<Option<ConversationGroup>> {
        let row = sqlx::query(
            "SELECT id, owner_user_id, created_at, deleted_at FROM conversation_groups WHERE id = ?",
        )
        .bind(group_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(ConversationGroup {
                id: parse_uuid(&row.get::<String, _>("id"))?,
                owner_user_id: row.get("owner_user_id"),
                created_at: row.get("created_at"),
                deleted_at: row.get("deleted_at"),
            })),
            None => Ok(None),
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        mode: ListMode,
        params: ListParams,
    ) -> DbResult<ListResult<Conversation>> {
        let limit = params.effective_limit(50, 200);
        let fetch_limit = limit + 1;

        let mode_filter = Self::mode_filter(mode);
        let deleted_filter = if params.include_deleted {
            ""
        } else {
            "AND c.deleted_at IS NULL AND g.deleted_at IS NULL"
        };

        let rows = match &params.cursor {
            None => {
                let query = format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS}
                    FROM conversations c
                    JOIN conversation_groups g ON g.id = c.group_id
                    JOIN conversation_memberships m ON m.group_id = c.group_id AND m.user_id = ?
                    WHERE 1 = 1 {deleted_filter} {mode_filter}
                    ORDER BY c.updated_at {order}, c.id {order}
                    LIMIT ?
                    "#,
                    order = params.sort_order.as_sql(),
                );
                sqlx::query(&query)
                    .bind(user_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(cursor) => {
                let (comparison, order, _) =
                    params.sort_order.cursor_query_params(params.direction);
                let query = format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS}
                    FROM conversations c
                    JOIN conversation_groups g ON g.id = c.group_id
                    JOIN conversation_memberships m ON m.group_id = c.group_id AND m.user_id = ?
                    WHERE (c.updated_at, c.id) {comparison} (?, ?)
                    {deleted_filter} {mode_filter}
                    ORDER BY c.updated_at {order}, c.id {order}
                    LIMIT ?
                    "#,
                );
                sqlx::query(&query)
                    .bind(user_id)
                    .bind(cursor.ts)
                    .bind(cursor.id.to_string())
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let has_more = rows.len() as i64 > limit;
        let mut items: Vec<Conversation> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_conversation)
            .collect::<DbResult<Vec<_>>>()?;

        let (_, _, should_reverse) = params.sort_order.cursor_query_params(params.direction);
        if params.cursor.is_some() && should_reverse {
            items.reverse();
        }

        let cursors = PageCursors::from_items(
            &items,
            has_more,
            params.direction,
            params.cursor.as_ref(),
            Self::cursor_from_conversation,
        );

        Ok(ListResult::new(items, has_more, cursors))
    }

    async fn list_group(&self, group_id: Uuid) -> DbResult<Vec<Conversation>> {
        let query = format!(
            r#"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            WHERE c.group_id = ? AND c.deleted_at IS NULL
            ORDER BY c.created_at ASC, c.id ASC
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_conversation).collect()
    }

    async fn update(
        &self,
        id: Uuid,
        title: Option<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> DbResult<Conversation> {
        let metadata_json = metadata.map(|m| serde_json::to_string(&m)).transpose()?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET title = COALESCE(?, title),
                metadata = COALESCE(?, metadata),
                updated_at = MAX(updated_at, ?)
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&title)
        .bind(&metadata_json)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.get(id).await?.ok_or(DbError::NotFound)
    }

    async fn soft_delete_group(&self, group_id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result =
            sqlx::query("UPDATE conversation_groups SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(at)
                .bind(group_id.to_string())
                .execute(&mut *tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query("UPDATE conversations SET deleted_at = ? WHERE group_id = ? AND deleted_at IS NULL")
            .bind(at)
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM conversation_memberships WHERE group_id = ?")
            .bind(group_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_groups_deleted_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM conversation_groups
            WHERE deleted_at IS NOT NULL AND deleted_at < ?
            ORDER BY deleted_at ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| parse_uuid(&row.get::<String, _>("id")))
            .collect()
    }

    async fn hard_delete_group(&self, group_id: Uuid) -> DbResult<GroupDeleteCounts> {
        let gid = group_id.to_string();
        let mut tx = self.pool.begin().await?;
        let mut counts = GroupDeleteCounts::default();

        counts.entries = sqlx::query("DELETE FROM entries WHERE group_id = ?")
            .bind(&gid)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        counts.memberships =
            sqlx::query("DELETE FROM conversation_memberships WHERE group_id = ?")
                .bind(&gid)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        counts.transfers =
            sqlx::query("DELETE FROM conversation_ownership_transfers WHERE group_id = ?")
                .bind(&gid)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        counts.conversations = sqlx::query("DELETE FROM conversations WHERE group_id = ?")
            .bind(&gid)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM conversation_groups WHERE id = ?")
            .bind(&gid)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(counts)
    }
}
