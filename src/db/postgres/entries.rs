use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{
            AttachmentLink, Cursor, EntryFilter, EntryRepo, EntryScope, ListParams, ListResult,
            PageCursors,
        },
    },
    models::{Entry, EpochFilter},
};

pub struct PostgresEntryRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

const ENTRY_COLUMNS: &str = "e.id, e.conversation_id, e.group_id, e.channel, e.content_type, \
     e.epoch, e.client_id, e.user_id, e.content, e.indexed_content, e.created_at, e.indexed_at";

impl PostgresEntryRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_entry(row: &PgRow) -> DbResult<Entry> {
        let channel: String = row.get("channel");
        Ok(Entry {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            group_id: row.get("group_id"),
            channel: channel.parse().map_err(DbError::Internal)?,
            content_type: row.get("content_type"),
            epoch: row.get("epoch"),
            client_id: row.get("client_id"),
            user_id: row.get("user_id"),
            content: row.get("content"),
            indexed_content: row.get("indexed_content"),
            created_at: row.get("created_at"),
            indexed_at: row.get("indexed_at"),
        })
    }

    fn cursor_from_entry(entry: &Entry) -> Cursor {
        Cursor::new(entry.created_at, entry.id)
    }

    /// Build scope + filter clauses with `$n` placeholders starting at
    /// `next_param`; returns the fragment and the binds in order.
    fn build_filter(
        scope: &EntryScope,
        filter: &EntryFilter,
        mut next_param: usize,
    ) -> (String, Vec<BindValue>, usize) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<BindValue> = Vec::new();
        let mut param = |binds: &mut Vec<BindValue>, value: BindValue| {
            binds.push(value);
            let n = next_param;
            next_param += 1;
            format!("${n}")
        };

        match scope.group_prefix {
            None => {
                let p = param(&mut binds, BindValue::Uuid(scope.conversation_id));
                clauses.push(format!("e.conversation_id = {p}"));
            }
            Some((group_id, cutoff)) => {
                let p_group = param(&mut binds, BindValue::Uuid(group_id));
                let p_conv = param(&mut binds, BindValue::Uuid(scope.conversation_id));
                let p_cutoff = param(&mut binds, BindValue::Timestamp(cutoff));
                clauses.push(format!(
                    "e.group_id = {p_group} AND (e.conversation_id = {p_conv} OR e.created_at < {p_cutoff})"
                ));
            }
        }

        if let Some(channel) = filter.channel {
            let p = param(&mut binds, BindValue::Text(channel.as_str().to_string()));
            clauses.push(format!("e.channel = {p}"));
        }

        if let Some(client_id) = &filter.client_id {
            let p = param(&mut binds, BindValue::Text(client_id.clone()));
            clauses.push(format!("e.client_id = {p}"));
        }

        match filter.epoch {
            EpochFilter::All => {}
            EpochFilter::At(epoch) => {
                let p = param(&mut binds, BindValue::Int(epoch));
                clauses.push(format!("e.epoch = {p}"));
            }
            EpochFilter::Latest => {
                let p_conv = param(&mut binds, BindValue::Uuid(scope.conversation_id));
                let p_channel = param(
                    &mut binds,
                    BindValue::Text(
                        filter
                            .channel
                            .map(|c| c.as_str().to_string())
                            .unwrap_or_else(|| "memory".to_string()),
                    ),
                );
                let p_client = param(
                    &mut binds,
                    BindValue::Text(filter.client_id.clone().unwrap_or_default()),
                );
                clauses.push(format!(
                    "e.epoch = (SELECT MAX(e2.epoch) FROM entries e2
                     WHERE e2.conversation_id = {p_conv} AND e2.channel = {p_channel}
                     AND e2.client_id = {p_client})"
                ));
            }
        }

        (clauses.join(" AND "), binds, next_param)
    }
}

enum BindValue {
    Text(String),
    Int(i64),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
}

impl BindValue {
    fn bind<'q>(
        &'q self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        match self {
            BindValue::Text(s) => query.bind(s),
            BindValue::Int(i) => query.bind(i),
            BindValue::Uuid(id) => query.bind(id),
            BindValue::Timestamp(ts) => query.bind(ts),
        }
    }
}

#[async_trait]
impl EntryRepo for PostgresEntryRepo {
    async fn append(
        &self,
        conversation_id: Uuid,
        entries: Vec<Entry>,
        links: Vec<AttachmentLink>,
    ) -> DbResult<Vec<Entry>> {
        let mut tx = self.write_pool.begin().await?;

        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO entries
                    (id, conversation_id, group_id, channel, content_type, epoch,
                     client_id, user_id, content, indexed_content, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.id)
            .bind(entry.conversation_id)
            .bind(entry.group_id)
            .bind(entry.channel.as_str())
            .bind(&entry.content_type)
            .bind(entry.epoch)
            .bind(&entry.client_id)
            .bind(&entry.user_id)
            .bind(&entry.content)
            .bind(&entry.indexed_content)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE conversations SET updated_at = GREATEST(updated_at, $1) WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        for link in &links {
            sqlx::query("UPDATE attachments SET entry_id = $1, expires_at = NULL WHERE id = $2")
                .bind(link.entry_id)
                .bind(link.attachment_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(entries)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Entry>> {
        let query = format!("SELECT {ENTRY_COLUMNS} FROM entries e WHERE e.id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.read_pool)
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
        let (where_clause, binds, next_param) = Self::build_filter(&scope, &filter, 1);

        let rows = match &params.cursor {
            None => {
                let query = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    WHERE {where_clause}
                    ORDER BY e.created_at {order}, e.id {order}
                    LIMIT ${next_param}
                    "#,
                    order = params.sort_order.as_sql(),
                );
                let mut q = sqlx::query(&query);
                for bind in &binds {
                    q = bind.bind(q);
                }
                q.bind(fetch_limit).fetch_all(&self.read_pool).await?
            }
            Some(cursor) => {
                let (comparison, order, _) =
                    params.sort_order.cursor_query_params(params.direction);
                let p_ts = next_param;
                let p_id = next_param + 1;
                let p_limit = next_param + 2;
                let query = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    WHERE {where_clause}
                    AND ROW(e.created_at, e.id) {comparison} ROW(${p_ts}, ${p_id})
                    ORDER BY e.created_at {order}, e.id {order}
                    LIMIT ${p_limit}
                    "#,
                );
                let mut q = sqlx::query(&query);
                for bind in &binds {
                    q = bind.bind(q);
                }
                q.bind(cursor.ts)
                    .bind(cursor.id)
                    .bind(fetch_limit)
                    .fetch_all(&self.read_pool)
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
            WHERE conversation_id = $1 AND channel = 'memory' AND client_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(client_id)
        .fetch_one(&self.read_pool)
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

        let rows = match &params.cursor {
            None => {
                let sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    JOIN conversation_groups g ON g.id = e.group_id
                    JOIN conversation_memberships m ON m.group_id = e.group_id AND m.user_id = $1
                    WHERE e.channel = 'history' AND g.deleted_at IS NULL
                    AND e.indexed_content IS NOT NULL
                    AND to_tsvector('english', e.indexed_content)
                        @@ websearch_to_tsquery('english', $2)
                    ORDER BY e.created_at DESC, e.id DESC
                    LIMIT $3
                    "#,
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(query)
                    .bind(fetch_limit)
                    .fetch_all(&self.read_pool)
                    .await?
            }
            Some(cursor) => {
                let sql = format!(
                    r#"
                    SELECT {ENTRY_COLUMNS} FROM entries e
                    JOIN conversation_groups g ON g.id = e.group_id
                    JOIN conversation_memberships m ON m.group_id = e.group_id AND m.user_id = $1
                    WHERE e.channel = 'history' AND g.deleted_at IS NULL
                    AND e.indexed_content IS NOT NULL
                    AND to_tsvector('english', e.indexed_content)
                        @@ websearch_to_tsquery('english', $2)
                    AND ROW(e.created_at, e.id) < ROW($3, $4)
                    ORDER BY e.created_at DESC, e.id DESC
                    LIMIT $5
                    "#,
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(query)
                    .bind(cursor.ts)
                    .bind(cursor.id)
                    .bind(fetch_limit)
                    .fetch_all(&self.read_pool)
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
            LIMIT $1
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn mark_indexed(&self, ids: &[Uuid], at: DateTime<Utc>) -> DbResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE entries SET indexed_at = $1 WHERE id = ANY($2)")
            .bind(at)
            .bind(ids)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
