use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::{Embedder, ServiceError, ServiceResult, VectorStore};
use crate::{
    auth::Subject,
    crypto::EncryptionProvider,
    db::{DbPool, ListParams},
    models::Entry,
};

/// Reciprocal-rank-fusion constant. Standard value; dampens the influence
/// of top ranks so one index cannot dominate.
const RRF_K: f64 = 60.0;

/// Search mode selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Lexical,
    Vector,
    #[default]
    Hybrid,
}

/// A scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: Entry,
    pub score: f64,
}

/// Hybrid search over conversation history: lexical full-text over the
/// `indexed_content` projection plus the pluggable vector index, merged
/// with reciprocal rank fusion. Both legs are scoped to groups the caller
/// is a member of.
#[derive(Clone)]
pub struct SearchService {
    db: Arc<DbPool>,
    encryption: Arc<dyn EncryptionProvider>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl SearchService {
    pub fn new(
        db: Arc<DbPool>,
        encryption: Arc<dyn EncryptionProvider>,
        embedder: Option<Arc<dyn Embedder>>,
        vector_store: Option<Arc<dyn VectorStore>>,
    ) -> Self {
        Self {
            db,
            encryption,
            embedder,
            vector_store,
        }
    }

    pub fn vector_enabled(&self) -> bool {
        self.embedder.is_some() && self.vector_store.is_some()
    }

    #[instrument(skip(self), fields(user = %subject.user_id))]
    pub async fn search(
        &self,
        subject: &Subject,
        query: &str,
        mode: SearchMode,
        limit: usize,
        params: ListParams,
    ) -> ServiceResult<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(ServiceError::Validation("query must not be empty".into()));
        }

        let hits = match mode {
            SearchMode::Lexical => self.lexical(subject, query, limit, params).await?,
            SearchMode::Vector => {
                if !self.vector_enabled() {
                    return Err(ServiceError::Unimplemented(
                        "vector search is not configured".into(),
                    ));
                }
                self.vector(subject, query, limit).await?
            }
            SearchMode::Hybrid => {
                let lexical = self.lexical(subject, query, limit, params).await?;
                if !self.vector_enabled() {
                    lexical
                } else {
                    let vector = self.vector(subject, query, limit).await?;
                    fuse(lexical, vector, limit)
                }
            }
        };

        Ok(hits)
    }

    async fn lexical(
        &self,
        subject: &Subject,
        query: &str,
        limit: usize,
        mut params: ListParams,
    ) -> ServiceResult<Vec<SearchHit>> {
        params.limit = Some(limit as i64);
        let result = self
            .db
            .entries()
            .search_history(&subject.user_id, query, params)
            .await?;

        let mut hits = Vec::with_capacity(result.items.len());
        let total = result.items.len() as f64;
        for (rank, mut entry) in result.items.into_iter().enumerate() {
            entry.content = self.encryption.decrypt(&entry.content)?;
            // Rank-derived score; full-text backends differ in scoring, the
            // ordering is what they agree on.
            hits.push(SearchHit {
                entry,
                score: (total - rank as f64) / total,
            });
        }
        Ok(hits)
    }

    async fn vector(
        &self,
        subject: &Subject,
        query: &str,
        limit: usize,
    ) -> ServiceResult<Vec<SearchHit>> {
        let (embedder, vector_store) = match (&self.embedder, &self.vector_store) {
            (Some(e), Some(v)) => (e, v),
            _ => return Ok(Vec::new()),
        };

        let group_ids = self
            .db
            .memberships()
            .readable_group_ids(&subject.user_id)
            .await?;
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;
        let query_vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Storage("embedder returned no vector".into()))?;

        let matches = vector_store
            .search(&query_vector, &group_ids, limit)
            .await
            .map_err(|e| ServiceError::Storage(e.to_string()))?;

        let mut hits = Vec::with_capacity(matches.len());
        for vector_match in matches {
            if let Some(mut entry) = self.db.entries().get(vector_match.entry_id).await? {
                entry.content = self.encryption.decrypt(&entry.content)?;
                hits.push(SearchHit {
                    entry,
                    score: vector_match.score,
                });
            }
        }
        Ok(hits)
    }
}

/// Merge two ranked lists with reciprocal rank fusion, deduplicating by
/// entry id.
fn fuse(lexical: Vec<SearchHit>, vector: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut scores: HashMap<Uuid, f64> = HashMap::new();
    let mut entries: HashMap<Uuid, Entry> = HashMap::new();

    for (rank, hit) in lexical.into_iter().enumerate() {
        *scores.entry(hit.entry.id).or_default() += 1.0 / (RRF_K + rank as f64 + 1.0);
        entries.entry(hit.entry.id).or_insert(hit.entry);
    }
    for (rank, hit) in vector.into_iter().enumerate() {
        *scores.entry(hit.entry.id).or_default() += 1.0 / (RRF_K + rank as f64 + 1.0);
        entries.entry(hit.entry.id).or_insert(hit.entry);
    }

    let mut fused: Vec<SearchHit> = scores
        .into_iter()
        .filter_map(|(id, score)| {
            entries.remove(&id).map(|entry| SearchHit { entry, score })
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Channel;

    fn hit(id: Uuid) -> SearchHit {
        SearchHit {
            entry: Entry {
                id,
                conversation_id: Uuid::new_v4(),
                group_id: Uuid::new_v4(),
                channel: Channel::History,
                content_type: "history".into(),
                epoch: None,
                client_id: None,
                user_id: None,
                content: serde_json::json!([]),
                indexed_content: None,
                created_at: Utc::now(),
                indexed_at: None,
            },
            score: 1.0,
        }
    }

    #[test]
    fn fusion_boosts_entries_in_both_lists() {
        let shared = Uuid::new_v4();
        let lexical_only = Uuid::new_v4();
        let vector_only = Uuid::new_v4();

        let fused = fuse(
            vec![hit(lexical_only), hit(shared)],
            vec![hit(vector_only), hit(shared)],
            10,
        );

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].entry.id, shared);
    }

    #[test]
    fn fusion_respects_limit() {
        let fused = fuse(
            vec![hit(Uuid::new_v4()), hit(Uuid::new_v4())],
            vec![hit(Uuid::new_v4())],
            2,
        );
        assert_eq!(fused.len(), 2);
    }
}
