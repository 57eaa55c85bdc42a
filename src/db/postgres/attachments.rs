use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{AttachmentRepo, RefcountDecision},
    },
    models::Attachment,
};

pub struct PostgresAttachmentRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

const ATTACHMENT_COLUMNS: &str = "a.id, a.user_id, a.content_type, a.filename, a.size_bytes, \
     a.sha256, a.storage_key, a.entry_id, a.expires_at, a.created_at, a.deleted_at";

impl PostgresAttachmentRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_attachment(row: &PgRow) -> DbResult<Attachment> {
        Ok(Attachment {
            id: row.get("id"),
            user_id: row.get("user_id"),
            content_type: row.get("content_type"),
            filename: row.get("filename"),
            size_bytes: row.get("size_bytes"),
            sha256: row.get("sha256"),
            storage_key: row.get("storage_key"),
            entry_id: row.get("entry_id"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        })
    }
}

#[async_trait]
impl AttachmentRepo for PostgresAttachmentRepo {
    async fn create(&self, attachment: Attachment) -> DbResult<Attachment> {
        sqlx::query(
            r#"
            INSERT INTO attachments
                (id, user_id, content_type, filename, size_bytes, sha256,
                 storage_key, entry_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(attachment.id)
        .bind(&attachment.user_id)
        .bind(&attachment.content_type)
        .bind(&attachment.filename)
        .bind(attachment.size_bytes)
        .bind(&attachment.sha256)
        .bind(&attachment.storage_key)
        .bind(attachment.entry_id)
        .bind(attachment.expires_at)
        .bind(attachment.created_at)
        .execute(&self.write_pool)
        .await?;
        Ok(attachment)
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<Attachment>> {
        let query = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a WHERE a.id = $1 AND a.deleted_at IS NULL"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.read_pool)
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
            SET storage_key = $1, size_bytes = $2, sha256 = $3, expires_at = $4
            WHERE id = $5 AND deleted_at IS NULL
            "#,
        )
        .bind(storage_key)
        .bind(size_bytes)
        .bind(sha256)
        .bind(expires_at)
        .bind(id)
        .execute(&self.write_pool)
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
            WHERE a.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
        .await?;
        Ok(row.map(|row| row.get("group_id")))
    }

    async fn begin_refcount_delete(&self, id: Uuid) -> DbResult<RefcountDecision> {
        let mut tx = self.write_pool.begin().await?;

        let query = format!(
            "SELECT {ATTACHMENT_COLUMNS} FROM attachments a \
             WHERE a.id = $1 AND a.deleted_at IS NULL FOR UPDATE"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let attachment = match row {
            Some(row) => Self::row_to_attachment(&row)?,
            None => return Err(DbError::NotFound),
        };

        let Some(storage_key) = attachment.storage_key else {
            sqlx::query("DELETE FROM attachments WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RefcountDecision::NoBlob);
        };

        // Lock every row sharing the key so two concurrent deletes cannot
        // both decide the blob is still referenced.
        let rows = sqlx::query(
            "SELECT id FROM attachments WHERE storage_key = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(&storage_key)
        .fetch_all(&mut *tx)
        .await?;

        if rows.len() > 1 {
            sqlx::query("DELETE FROM attachments WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(RefcountDecision::BlobRetained);
        }

        sqlx::query("UPDATE attachments SET deleted_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(RefcountDecision::BlobDeletable { storage_key })
    }

    async fn finish_delete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM attachments WHERE id = $1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn delete_row(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM attachments WHERE id = $1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn count_live_by_storage_key(&self, storage_key: &str) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM attachments WHERE storage_key = $1 AND deleted_at IS NULL",
        )
        .bind(storage_key)
        .fetch_one(&self.read_pool)
        .await?;
        Ok(row.get("n"))
    }

    async fn find_expired(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            WHERE a.entry_id IS NULL AND a.deleted_at IS NULL
            AND a.expires_at IS NOT NULL AND a.expires_at < $1
            ORDER BY a.expires_at ASC
            LIMIT $2
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn find_soft_deleted(&self, limit: i64) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            WHERE a.deleted_at IS NOT NULL
            ORDER BY a.deleted_at ASC
            LIMIT $1
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(limit)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }

    async fn list_by_group(&self, group_id: Uuid) -> DbResult<Vec<Attachment>> {
        let query = format!(
            r#"
            SELECT {ATTACHMENT_COLUMNS} FROM attachments a
            JOIN entries e ON e.id = a.entry_id
            WHERE e.group_id = $1 AND a.deleted_at IS NULL
            "#,
        );
        let rows = sqlx::query(&query)
            .bind(group_id)
            .fetch_all(&self.read_pool)
            .await?;
        rows.iter().map(Self::row_to_attachment).collect()
    }
}
