use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{error::DbResult, repos::TaskRepo},
    models::{NewTask, Task},
};

pub struct PostgresTaskRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresTaskRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_task(row: &PgRow) -> DbResult<Task> {
        Ok(Task {
            id: row.get("id"),
            kind: row.get("kind"),
            body: row.get("body"),
            retry_at: row.get("retry_at"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TaskRepo for PostgresTaskRepo {
    async fn enqueue(&self, task: NewTask) -> DbResult<Task> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO tasks (id, kind, body, retry_at, retry_count, created_at)
            VALUES ($1, $2, $3, $4, 0, $5)
            "#,
        )
        .bind(id)
        .bind(&task.kind)
        .bind(&task.body)
        .bind(task.retry_at)
        .bind(now)
        .execute(&self.write_pool)
        .await?;

        Ok(Task {
            id,
            kind: task.kind,
            body: task.body,
            retry_at: task.retry_at,
            retry_count: 0,
            last_error: None,
            created_at: now,
        })
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> DbResult<Vec<Task>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, body, retry_at, retry_count, last_error, created_at
            FROM tasks
            WHERE retry_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.read_pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn complete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET retry_at = $1, retry_count = retry_count + 1, last_error = $2
            WHERE id = $3
            "#,
        )
        .bind(retry_at)
        .bind(error)
        .bind(id)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }
}
