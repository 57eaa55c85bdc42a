use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_json, parse_uuid};
use crate::{
    db::{error::DbResult, repos::TaskRepo},
    models::{NewTask, Task},
};

pub struct SqliteTaskRepo {
    pool: SqlitePool,
}

impl SqliteTaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> DbResult<Task> {
        let body: String = row.get("body");
        Ok(Task {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            kind: row.get("kind"),
            body: parse_json(&body)?,
            retry_at: row.get("retry_at"),
            retry_count: row.get("retry_count"),
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl TaskRepo for SqliteTaskRepo {
    async fn enqueue(&self, task: NewTask) -> DbResult<Task> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let body_json = serde_json::to_string(&task.body)?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, kind, body, retry_at, retry_count, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&task.kind)
        .bind(&body_json)
        .bind(task.retry_at)
        .bind(now)
        .execute(&self.pool)
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
            WHERE retry_at <= ?
            ORDER BY created_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn complete(&self, id: Uuid) -> DbResult<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET retry_at = ?, retry_count = retry_count + 1, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(retry_at)
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
