use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_json, parse_uuid};
use crate::{
    db::{
        error::DbResult,
        repos::{
            AttachmentLink, Cursor, EntryFilter, EntryRepo, EntryScope, ListParams, ListResult,
            PageCursors,
        },
    },
    models::{Entry, EpochFilter},
};

pub struct SqliteEntryRepo {
    pool: SqlitePool,
}

const ENTRY_COLUMNS: &str = "e.id, e.conversation_id, e.group_id, e.channel, e.content_type, \
     e.epoch, e.client_id, e.user_id, e.content, e.indexed_content, e.created_at, e.indexed_at";

impl SqliteEntryRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> DbResult<Entry> {
        let channel: String = row.get("channel");
        let content_json: String = row.get("content");

        Ok(Entry {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            conversation_id: parse_uuid(&row.get::<String, _>("conversation_id"))?,
            group_id: parse_uuid(&row.get::<String, _>("group_id"))?,
            channel: channel
                .parse()
                .map_err(crate::db::error::DbError::Internal)?,
            content_type: row.get("content_type"),
            epoch: row.get("epoch"),
            client_id: row.get("client_id"),
            user_id: row.get("user_id"),
            content: parse_json(&content_json)?,
            indexed_content: row.get("indexed_content"),
            created_at: row.get("created_at"),
            indexed_at: row.get("indexed_at"),
        })
    }

    fn cursor_from_entry(entry: &Entry) -> Cursor {
        Cursor::new(entry.created_at, entry.id)
    }

    /// Build the scope + filter WHERE fragment and the positional bind list.
    fn build_filter(scope: &EntryScope, filter: &EntryFilter) -> (String, Vec<BindValue>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();

        match scope.group_prefix {
            None => {
                clauses.push("e.conversation_id = ?".to_string());
                binds.push(BindValue::Text(scope.conversation_id.to_string()));
            }
            Some((group_id, cutoff)) => {
                clauses.push(
                    "e.group_id = ? AND (e.conversation_id = ? OR e.created_at < ?)".to_string(),
                );
                binds.push(BindValue::Text(group_id.to_string()));
                binds.push(BindValue::Text(scope.conversation_id.to_string()));
                binds.push(BindValue::Timestamp(cutoff));
            }
        }

        if let Some(channel) = filter.channel {
            clauses.push("e.channel = ?".to_string());
            binds.push(BindValue::Text(channel.as_str().to_string()));
        }

        if let Some(client_id) = &filter.client_id {
            clauses.push("e.client_id = ?".to_string());
            binds.push(BindValue::Text(client_id.clone()));
        }

        match filter.epoch {
            EpochFilter::All => {}
            EpochFilter::At(epoch) => {
                clauses.push("e.epoch = ?".to_string());
                binds.push(BindValue::Int(epoch));
            }
            // One round trip: the optimizer fuses the scalar subquery with
            // the outer scan via the (conversation, channel, client, epoch,
            // created_at) index.
            EpochFilter::Latest => {
                clauses.push(
                    "e.epoch = (SELECT MAX(e2.epoch) FROM entries e2
                     WHERE e2.conversation_id = ? AND e2.channel = ? AND e2.client_id = ?)"
                        .to_string(),
                );
                binds.push(BindValue::Text(scope.conversation_id.to_string()));
                binds.push(BindValue::Text(
                    filter
                        .channel
                        .map(|c| c.as_str().to_string())
                        .unwrap_or_else(|| "memory".to_string()),
                ));
                binds.push(BindValue::Text(filter.client_id.clone().unwrap_or_default()));
            }
        }

        (clauses.join(" AND "), binds)
    }
}

/// A positional bind that keeps sqlx's native encodings per type.
enum BindValue {
    Text(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
}

impl BindValue {
    fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match self {
            BindValue::Text(s) => query.bind(s),
            BindValue::Int(i) => query.bind(i),
            BindValue::Timestamp(ts) => query.bind(ts),
        }
    }
}

#[async_trait]
impl EntryRepo for SqliteEntryRepo {
    async fn append(
        &self,
        conversation_id: Uuid,
        entries: Vec<Entry>,
        links: Vec<AttachmentLink>,
    ) -> DbResult<Vec<Entry>> {
        let mut tx = self.pool.begin().await?;

        for entry in &entries {
            let content_json = serde_json::to_string(&entry.content)?;
            sqlx::query(
                r#"
                INSERT INTO entries
                    (id, conversation_id, group_id, channel, content_type, epoch,
                     client_id, user_id, content, indexed_content, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.id.to_string())
            .bind(entry.conversation_id.to_string())
            .bind(entry.group_id.to_string())
            .bind(entry.channel.as_str())
            .bind(&entry.content_type)
            .bind(entry.epoch)
            .bind(&entry.client_id)
            .bind(&entry.user_id)
            .bind(&content_json)
            .bind(&entry.indexed_content)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        // updated_at only moves forward, even if this node's clock is behind.
        sqlx::query("UPDATE conversations SET updated_at = MAX(updated_at, ?) WHERE id = ?")
            .bind(Utc::now())
            .bind(conversation_id.to_string())
            .execute(&mut *tx)
            .await?;

        for link in &links {
            sqlx::query("UPDATE attachments SET entry_id = ?, expires_at = NULL WHERE id = ?")
                .bind(link.entry_id.to_string())
                .bind(link.attachment_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(entries)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Entry>> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM entries e WHERE e.id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_entry).transpose()
    }

    async fn list(
        &self,
        scope: EntryScope,
        filter: EntryFilter,
        params: ListParams,
    ) -> DbResult<ListResult<Entry>> {
        let limit = params.effective_limit(100, 1000);
        let fetch_limit = limit + 1;
        let (where_clause, binds) = Self::build_filter(&scope, &filter);

        let rows = match &params.cursor {
            None => {
                let query = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    WHERE {where_clause}
                    ORDER BY e.created_at {order}, e.id {order}
                    LIMIT ?
                    "#,
                    order = params.sort_order.as_sql(),
                );
                let mut q = sqlx::query(&query);
                for bind in &binds {
                    q = bind.bind(q);
                }
                q.bind(fetch_limit).fetch_all(&self.pool).await?
            }
            Some(cursor) => {
                let (comparison, order, _) =
                    params.sort_order.cursor_query_params(params.direction);
                let query = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    WHERE {where_clause}
                    AND (e.created_at, e.id) {comparison} (?, ?)
                    ORDER BY e.created_at {order}, e.id {order}
                    LIMIT ?
                    "#,
                );
                let mut q = sqlx::query(&query);
                for bind in &binds {
                    q = bind.bind(q);
                }
                q.bind(cursor.ts)
                    .bind(cursor.id.to_string())
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let has_more = rows.len() as i64 > limit;
        let mut items: Vec<Entry> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_entry)
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
            Self::cursor_from_entry,
        );

        Ok(ListResult::new(items, has_more, cursors))
    }

    async fn latest_epoch(&self, conversation_id: Uuid, client_id: &str) -> DbResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(epoch) AS latest FROM entries
            WHERE conversation_id = ? AND channel = 'memory' AND client_id = ?
            "#,
        )
        .bind(conversation_id.to_string())
        .bind(client_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("latest"))
    }

    async fn search_history(
        &self,
        user_id: &str,
        query: &str,
        params: ListParams,
    ) -> DbResult<ListResult<Entry>> {
        let limit = params.effective_limit(50, 200);
        let fetch_limit = limit + 1;
        // SQLite has no tsvector; substring match over the projection is the
        // lexical fallback for this backend.
        let pattern = format!("%{}%", query);

        let rows = match &params.cursor {
            None => {
                let sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    JOIN conversation_groups g ON g.id = e.group_id
                    JOIN conversation_memberships m ON m.group_id = e.group_id AND m.user_id = ?
                    WHERE e.channel = 'history' AND g.deleted_at IS NULL
                    AND e.indexed_content IS NOT NULL AND e.indexed_content LIKE ?
                    ORDER BY e.created_at DESC, e.id DESC
                    LIMIT ?
                    "#,
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(&pattern)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            Some(cursor) => {
                let sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    JOIN conversation_groups g ON g.id = e.group_id
                    JOIN conversation_memberships m ON m.group_id = e.group_id AND m.user_id = ?
                    WHERE e.channel = 'history' AND g.deleted_at IS NULL
                    AND e.indexed_content IS NOT NULL AND e.indexed_content LIKE ?
                    AND (e.created_at, e.id) < (?, ?)
                    ORDER BY e.created_at DESC, e.id DESC
                    LIMIT ?
                    "#,
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(&pattern)
                    .bind(cursor.ts)
                    .bind(cursor.id.to_string())
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let has_more = rows.len() as i64 > limit;
        let items: Vec<Entry> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_entry)
            .collect::<DbResult<Vec<_>>>()?;

        let cursors = PageCursors::from_items(
            &items,
            has_more,
            params.direction,
            params.cursor.as_ref(),
            Self::cursor_from_entry,
        );

        Ok(ListResult::new(items, has_more, cursors))
    }

    async fn find_pending_vector_indexing(&self, limit: i64) -> DbResult<Vec<Entry>> {
        let query = format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM entries e
            JOIN conversation_groups g ON g.id = e.group_id
            WHERE e.indexed_content IS NOT NULL AND e.indexed_at IS NULL
            AND g.deleted_at IS NULL
            ORDER BY e.created_at ASC
            LIMIT ?
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn mark_indexed(&self, ids: &[Uuid], at: DateTime<Utc>) -> DbResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let query = format!("UPDATE entries SET indexed_at = ? WHERE id IN ({placeholders})");
        let mut q = sqlx::query(&query).bind(at);
        for id in ids {
            q = q.bind(id.to_string());
        }
        q.execute(&self.pool).await?;
        Ok(())
    }
}
