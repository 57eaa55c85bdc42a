use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_uuid, parse_uuid_opt};
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{AttachmentRepo, RefcountDecision},
    },
    models::Attachment,
};

pub struct SqliteAttachmentRepo {
    pool: SqlitePool,
}

const ATTACHMENT_COLUMNS: &str = "a.id, a.user_id, a.content_type, a.filename, a.size_bytes, \
     a.sha256, a.storage_key, a.entry_id, a.expires_at, a.created_at, a.deleted_at";

impl SqliteAttachmentRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_attachment(row: &SqliteRow) -> DbResult<Attachment> {
        Ok(Attachment {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: row.get("user_id"),
            content_type: row.get("content_type"),
            filename: row.get("filename"),
            size_bytes: row.get("size_bytes"),
            sha256: row.get("sha256"),
            storage_key: row.get("storage_key"),
            entry_id: parse_uuid_opt(row.get("entry_id"))?,
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

#[async_trait]
impl AttachmentRepo for SqliteAttachmentRepo {
    async fn create(&self, attachment: Attachment) -> DbResult<Attachment> {
        sqlx::query(
            r#"
            INSERT INTO attachments
                (id, user_id, content_type, filename, size_bytes, sha256,
                 storage_key, entry_id, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attachment.id.to_string())
        .bind(&attachment.user_id)
        .bind(&attachment.content_type)
        .bind(&attachment.filename)
        .bind(attachment.size_bytes)
        .bind(&attachment.sha256)
        .bind(&attachment.storage_key)
        .bind(attachment.entry_id.map(|id| id.to_string()))
        .bind(attachment.expires_at)
        .bind(attachment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(attachment)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Attachment>> {
        let query = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a WHERE a.id = ? AND a.deleted_at IS NULL"
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_attachment).transpose()
    }

    async fn record_upload(
        &self,
        id: Uuid,
        storage_key: &str,
        size_bytes: i64,
        sha256: &str,
        expires_at: DateTime<Utc>,
    ) -> DbResult<Attachment> {
        let result = sqlx::query(
            r#"
            UPDATE attachments
            SET storage_key = ?, size_bytes = ?, sha256 = ?, expires_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(storage_key)
        .bind(size_bytes)
        .bind(sha256)
        .bind(expires_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        self.get(id).await?.ok_or(DbError::NotFound)
    }

    async fn linked_group_id(&self, id: Uuid) -> DbResult<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT e.group_id FROM attachments a
            JOIN entries e ON e.id = a.entry_id
            WHERE a.id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| parse_uuid(&row.get::<String, _>("group_id")))
            .transpose()
    }

    async fn begin_refcount_delete(&self, id: Uuid) -> DbResult<RefcountDecision> {
        // SQLite serializes writers, so the transaction itself provides the
        // row-lock semantics FOR UPDATE gives on Postgres.
        let mut tx = self.pool.begin().await?;

        let query = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a WHERE a.id = ? AND a.deleted_at IS NULL"
        );
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let attachment = match row {
            Some(row) => Self::row_to_attachment(&row)?,
            None => return Err(DbError::NotFound),
        };

        let Some(storage_key) = attachment.storage_key else {
            sqlx::query("DELETE FROM attachments WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RefcountDecision::NoBlob);
        };

        let live: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM attachments WHERE storage_key = ? AND deleted_at IS NULL",
        )
        .bind(&storage_key)
        .fetch_one(&mut *tx)
        .await?
        .get("n");

        if live > 1 {
            sqlx::query("DELETE FROM attachments WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RefcountDecision::BlobRetained);
        }

        sqlx::query("UPDATE attachments SET deleted_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(RefcountDecision::BlobDeletable { storage_key })
    }

    async fn finish_delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_row(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM attachments WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_live_by_storage_key(&self, storage_key: &str) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM attachments WHERE storage_key = ? AND deleted_at IS NULL",
        )
        .bind(storage_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            WHERE a.entry_id IS NULL AND a.deleted_at IS NULL
            AND a.expires_at IS NOT NULL AND a.expires_at < ?
            ORDER BY a.expires_at ASC
            LIMIT ?
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn find_soft_deleted(&self, limit: i64) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            WHERE a.deleted_at IS NOT NULL
            ORDER BY a.deleted_at ASC
            LIMIT ?
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            JOIN entries e ON e.id = a.entry_id
            WHERE e.group_id = ? AND a.deleted_at IS NULL
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(group_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }
}
