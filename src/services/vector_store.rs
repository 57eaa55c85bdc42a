use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::VectorStoreKind,
    db::DbPool,
};

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("Vector store error: {0}")]
    Backend(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// An embedding row keyed by entry, carrying the group id for scoped
/// search and group-level deletion.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub entry_id: Uuid,
    pub group_id: Uuid,
    pub embedding: Vec<f32>,
}

/// A similarity hit.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub entry_id: Uuid,
    pub group_id: Uuid,
    /// Cosine similarity in `[0, 1]`-ish range; higher is closer.
    pub score: f64,
}

/// Pluggable vector index, filtered by the group ids the caller can read.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        query: &[f32],
        group_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError>;

    /// Drop every vector belonging to a group. Called on group eviction.
    async fn delete_group(&self, group_id: Uuid) -> Result<(), VectorStoreError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// pgvector backend
// ─────────────────────────────────────────────────────────────────────────────

/// pgvector-backed store in the primary PostgreSQL database.
///
/// The `entry_embeddings` table is created lazily at startup rather than in
/// migrations, since the `vector` extension only exists on deployments that
/// enable vector search.
#[cfg(feature = "database-postgres")]
pub struct PgVectorStore {
    pool: sqlx::PgPool,
    dimensions: usize,
}

#[cfg(feature = "database-postgres")]
impl PgVectorStore {
    pub async fn new(pool: sqlx::PgPool, dimensions: usize) -> Result<Self, VectorStoreError> {
        let store = Self { pool, dimensions };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), VectorStoreError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Backend(e.to_string()))?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS entry_embeddings (
                entry_id UUID PRIMARY KEY,
                group_id UUID NOT NULL,
                embedding vector({}) NOT NULL
            )
            "#,
            self.dimensions
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS entry_embeddings_group_idx ON entry_embeddings (group_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Backend(e.to_string()))?;

        Ok(())
    }

    /// pgvector accepts vectors as `[v1,v2,...]` literals.
    fn to_pgvector(embedding: &[f32]) -> String {
        let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
        format!("[{}]", parts.join(","))
    }

    fn check_dimensions(&self, embedding: &[f32]) -> Result<(), VectorStoreError> {
        if embedding.len() != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        Ok(())
    }
}

#[cfg(feature = "database-postgres")]
#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        for record in records {
            self.check_dimensions(&record.embedding)?;
            sqlx::query(
                r#"
                INSERT INTO entry_embeddings (entry_id, group_id, embedding)
                VALUES ($1, $2, $3::vector)
                ON CONFLICT (entry_id) DO UPDATE SET embedding = EXCLUDED.embedding
                "#,
            )
            .bind(record.entry_id)
            .bind(record.group_id)
            .bind(Self::to_pgvector(&record.embedding))
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        group_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError> {
        use sqlx::Row;

        self.check_dimensions(query)?;
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT entry_id, group_id,
                   1 - (embedding <=> $1::vector) AS score
            FROM entry_embeddings
            WHERE group_id = ANY($2)
            ORDER BY embedding <=> $1::vector
            LIMIT $3
            "#,
        )
        .bind(Self::to_pgvector(query))
        .bind(group_ids)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| VectorStoreError::Backend(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| VectorMatch {
                entry_id: row.get("entry_id"),
                group_id: row.get("group_id"),
                score: row.get::<f64, _>("score"),
            })
            .collect())
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<(), VectorStoreError> {
        sqlx::query("DELETE FROM entry_embeddings WHERE group_id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(|e| VectorStoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local vector index. Development, SQLite deployments, tests. Not
/// persistent; the indexer repopulates it after restart because rows stay
/// unmarked until indexed.
#[derive(Default)]
pub struct MemoryVectorStore {
    records: RwLock<HashMap<Uuid, (Uuid, Vec<f32>)>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), VectorStoreError> {
        let mut map = self.records.write().await;
        for record in records {
            map.insert(record.entry_id, (record.group_id, record.embedding));
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        group_ids: &[Uuid],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, VectorStoreError> {
        let map = self.records.read().await;
        let mut matches: Vec<VectorMatch> = map
            .iter()
            .filter(|(_, (group_id, _))| group_ids.contains(group_id))
            .map(|(entry_id, (group_id, embedding))| VectorMatch {
                entry_id: *entry_id,
                group_id: *group_id,
                score: cosine(query, embedding),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_group(&self, group_id: Uuid) -> Result<(), VectorStoreError> {
        self.records
            .write()
            .await
            .retain(|_, (gid, _)| *gid != group_id);
        Ok(())
    }
}

/// Build a vector store from configuration; `None` disables vector search.
pub async fn create_vector_store(
    kind: VectorStoreKind,
    db: &DbPool,
    dimensions: usize,
) -> Result<Option<Arc<dyn VectorStore>>, VectorStoreError> {
    match kind {
        VectorStoreKind::None => Ok(None),
        VectorStoreKind::Memory => Ok(Some(Arc::new(MemoryVectorStore::new()))),
        VectorStoreKind::Pgvector => {
            #[cfg(feature = "database-postgres")]
            {
                let pool = db.pg_pool().ok_or_else(|| {
                    VectorStoreError::Backend("pgvector requires a PostgreSQL database".into())
                })?;
                Ok(Some(Arc::new(
                    PgVectorStore::new(pool.clone(), dimensions).await?,
                )))
            }
            #[cfg(not(feature = "database-postgres"))]
            {
                let _ = (db, dimensions);
                Err(VectorStoreError::Backend(
                    "pgvector requires the 'database-postgres' feature".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_search_respects_group_scope() {
        let store = MemoryVectorStore::new();
        let group_a = Uuid::new_v4();
        let group_b = Uuid::new_v4();
        let entry_a = Uuid::new_v4();
        let entry_b = Uuid::new_v4();

        store
            .upsert(vec![
                VectorRecord {
                    entry_id: entry_a,
                    group_id: group_a,
                    embedding: vec![1.0, 0.0],
                },
                VectorRecord {
                    entry_id: entry_b,
                    group_id: group_b,
                    embedding: vec![1.0, 0.0],
                },
            ])
            .await
            .unwrap();

        let matches = store.search(&[1.0, 0.0], &[group_a], 10).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entry_id, entry_a);
        assert!(matches[0].score > 0.99);
    }

    #[tokio::test]
    async fn memory_store_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        let group = Uuid::new_v4();
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();

        store
            .upsert(vec![
                VectorRecord {
                    entry_id: far,
                    group_id: group,
                    embedding: vec![0.0, 1.0],
                },
                VectorRecord {
                    entry_id: close,
                    group_id: group,
                    embedding: vec![0.9, 0.1],
                },
            ])
            .await
            .unwrap();

        let matches = store.search(&[1.0, 0.0], &[group], 10).await.unwrap();
        assert_eq!(matches[0].entry_id, close);
    }

    #[tokio::test]
    async fn memory_store_delete_group_removes_vectors() {
        let store = MemoryVectorStore::new();
        let group = Uuid::new_v4();
        store
            .upsert(vec![VectorRecord {
                entry_id: Uuid::new_v4(),
                group_id: group,
                embedding: vec![1.0],
            }])
            .await
            .unwrap();

        store.delete_group(group).await.unwrap();
        assert!(store.search(&[1.0], &[group], 10).await.unwrap().is_empty());
    }

    #[cfg(feature = "database-postgres")]
    #[test]
    fn pgvector_literal_format() {
        assert_eq!(PgVectorStore::to_pgvector(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
    }
}
