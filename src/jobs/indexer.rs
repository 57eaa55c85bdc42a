use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    config::SearchConfig,
    db::DbPool,
    observability::metrics,
    services::{Embedder, VectorRecord, VectorStore},
};

/// Background vector indexer.
///
/// Polls history entries whose `indexed_content` projection has not been
/// embedded yet, computes embeddings in one batch, upserts them, and stamps
/// `indexed_at`. A failed batch is simply retried on the next tick.
#[derive(Clone)]
pub struct VectorIndexer {
    db: Arc<DbPool>,
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    config: SearchConfig,
}

impl VectorIndexer {
    pub fn new(
        db: Arc<DbPool>,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        config: SearchConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            vector_store,
            config,
        }
    }

    /// Index one batch. Returns how many entries were indexed.
    pub async fn run_once(&self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let pending = self
            .db
            .entries()
            .find_pending_vector_indexing(self.config.indexer_batch_size)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = pending
            .iter()
            .map(|entry| entry.indexed_content.clone().unwrap_or_default())
            .collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let records: Vec<VectorRecord> = pending
            .iter()
            .zip(embeddings)
            .map(|(entry, embedding)| VectorRecord {
                entry_id: entry.id,
                group_id: entry.group_id,
                embedding,
            })
            .collect();
        self.vector_store.upsert(records).await?;

        let ids: Vec<uuid::Uuid> = pending.iter().map(|entry| entry.id).collect();
        self.db.entries().mark_indexed(&ids, Utc::now()).await?;

        metrics::record_entries_indexed(ids.len() as u64);
        debug!(count = ids.len(), "Indexed entries into the vector store");
        Ok(ids.len())
    }
}

/// Periodic indexing loop; drains cleanly on cancellation.
pub async fn start_indexer_worker(indexer: VectorIndexer, shutdown: CancellationToken) {
    let interval = indexer.config.indexer_interval();
    info!(interval_secs = interval.as_secs(), "Starting vector indexer");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Vector indexer stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        match indexer.run_once().await {
            Ok(indexed) if indexed > 0 => debug!(indexed, "Indexer pass complete"),
            Ok(_) => {}
            // Transient embedder/vector failures must not block the loop.
            Err(e) => error!(error = %e, "Indexer pass failed; will retry"),
        }
    }
}
