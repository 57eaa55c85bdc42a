use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{MembershipRepo, OwnershipTransferRepo},
    },
    models::{ConversationMembership, OwnershipTransfer, TransferStatus},
};

pub struct PostgresMembershipRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresMembershipRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_membership(row: &PgRow) -> DbResult<ConversationMembership> {
        let level: String = row.get("access_level");
        Ok(ConversationMembership {
            group_id: row.get("group_id"),
            user_id: row.get("user_id"),
            access_level: level.parse().map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl MembershipRepo for PostgresMembershipRepo {
    async fn upsert(
        &self,
        membership: ConversationMembership,
    ) -> DbResult<ConversationMembership> {
        sqlx::query(
            r#"
            INSERT INTO conversation_memberships (group_id, user_id, access_level, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (group_id, user_id) DO UPDATE SET access_level = EXCLUDED.access_level
            "#,
        )
        .bind(membership.group_id)
        .bind(&membership.user_id)
        .bind(membership.access_level.as_str())
        .bind(membership.created_at)
        .execute(&self.write_pool)
        .await?;
        Ok(membership)
    }

    async fn get(
        &self,
        group_id: Uuid,
        user_id: &str,
    ) -> DbResult<Option<ConversationMembership>> {
        let row = sqlx::query(
            r#"
            SELECT group_id, user_id, access_level, created_at
            FROM conversation_memberships
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.read_pool)
        .await?;
        row.as_ref().map(Self::row_to_membership).transpose()
    }

    async fn list_for_group(&self, group_id: Uuid) -> DbResult<Vec<ConversationMembership>> {
        let rows = sqlx::query(
            r#"
            SELECT group_id, user_id, access_level, created_at
            FROM conversation_memberships
            WHERE group_id = $1
            ORDER BY created_at ASC, user_id ASC
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(Self::row_to_membership).collect()
    }

    async fn delete(&self, group_id: Uuid, user_id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "DELETE FROM conversation_memberships WHERE group_id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .execute(&self.write_pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn readable_group_ids(&self, user_id: &str) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT m.group_id FROM conversation_memberships m
            JOIN conversation_groups g ON g.id = m.group_id
            WHERE m.user_id = $1 AND g.deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.read_pool)
        .await?;
        Ok(rows.iter().map(|row| row.get("group_id")).collect())
    }
}

pub struct PostgresOwnershipTransferRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresOwnershipTransferRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_transfer(row: &PgRow) -> DbResult<OwnershipTransfer> {
        let status: String = row.get("status");
        Ok(OwnershipTransfer {
            id: row.get("id"),
            group_id: row.get("group_id"),
            from_user_id: row.get("from_user_id"),
            to_user_id: row.get("to_user_id"),
            status: status.parse().map_err(DbError::Internal)?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl OwnershipTransferRepo for PostgresOwnershipTransferRepo {
    async fn create(&self, transfer: OwnershipTransfer) -> DbResult<OwnershipTransfer> {
        let result = sqlx::query(
            r#"
            INSERT INTO conversation_ownership_transfers
                (id, group_id, from_user_id, to_user_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.group_id)
        .bind(&transfer.from_user_id)
        .bind(&transfer.to_user_id)
        .bind(transfer.status.as_str())
        .bind(transfer.created_at)
        .execute(&self.write_pool)
        .await;

        match result {
            Ok(_) => Ok(transfer),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                DbError::Conflict("an ownership transfer is already pending for this group".into()),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, group_id, from_user_id, to_user_id, status, created_at
            FROM conversation_ownership_transfers WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.read_pool)
        .await?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<OwnershipTransfer>> {
        let rows = sqlx::query(
            r#"
            SELECT id, group_id, from_user_id, to_user_id, status, created_at
            FROM conversation_ownership_transfers
            WHERE status = 'pending' AND (from_user_id = $1 OR to_user_id = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(Self::row_to_transfer).collect()
    }

    async fn find_pending_for_group(
        &self,
        group_id: Uuid,
    ) -> DbResult<Option<OwnershipTransfer>> {
        let row = sqlx::query(
            r#"
            SELECT id, group_id, from_user_id, to_user_id, status, created_at
            FROM conversation_ownership_transfers
            WHERE group_id = $1 AND status = 'pending'
            "#,
        )
        .bind(group_id)
        .fetch_optional(&self.read_pool)
        .await?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn accept(&self, id: Uuid) -> DbResult<OwnershipTransfer> {
        let mut tx = self.write_pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, group_id, from_user_id, to_user_id, status, created_at
            FROM conversation_ownership_transfers
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut transfer = match row {
            Some(row) => Self::row_to_transfer(&row)?,
            None => return Err(DbError::NotFound),
        };
        if transfer.status != TransferStatus::Pending {
            return Err(DbError::Conflict(format!(
                "transfer is {}",
                transfer.status.as_str()
            )));
        }

        sqlx::query("UPDATE conversation_groups SET owner_user_id = $1 WHERE id = $2")
            .bind(&transfer.to_user_id)
            .bind(transfer.group_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_memberships (group_id, user_id, access_level, created_at)
            VALUES ($1, $2, 'owner', $3)
            ON CONFLICT (group_id, user_id) DO UPDATE SET access_level = 'owner'
            "#,
        )
        .bind(transfer.group_id)
        .bind(&transfer.to_user_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversation_memberships SET access_level = 'writer'
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(transfer.group_id)
        .bind(&transfer.from_user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE conversation_ownership_transfers SET status = 'accepted' WHERE id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        transfer.status = TransferStatus::Accepted;
        Ok(transfer)
    }

    async fn cancel(&self, id: Uuid) -> DbResult<OwnershipTransfer> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_ownership_transfers SET status = 'cancelled'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(id).await? {
                Some(transfer) => Err(DbError::Conflict(format!(
                    "transfer is {}",
                    transfer.status.as_str()
                ))),
                None => Err(DbError::NotFound),
            };
        }
        self.get(id).await?.ok_or(DbError::NotFound)
    }
}
