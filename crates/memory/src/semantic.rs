//! Long-term memory: salient turns searched by embedding similarity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use companion_core::error::MemoryError;
use companion_core::memory::{Embedder, RetrievalStore};
use companion_core::message::Turn;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::vector::rank_by_similarity;

#[derive(Debug, Clone)]
struct StoredTurn {
    turn: Turn,
    salience: f32,
    embedding: Vec<f32>,
    created_at: DateTime<Utc>,
}

/// In-process vector store over an [`Embedder`].
///
/// `search` is fail-open: an embedding failure yields an empty result.
/// Equal similarity scores rank the more salient turn first, then the
/// newer one.
pub struct SemanticMemory {
    embedder: Arc<dyn Embedder>,
    entries: Arc<RwLock<Vec<StoredTurn>>>,
    min_score: f32,
}

impl SemanticMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Arc::new(RwLock::new(Vec::new())),
            min_score: 0.05,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl RetrievalStore for SemanticMemory {
    fn name(&self) -> &str {
        "semantic"
    }

    async fn search(&self, query: &str, top_k: usize) -> Vec<Turn> {
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let query_embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Retrieval embedding failed, returning no memories");
                return Vec::new();
            }
        };

        let entries = self.entries.read().await;
        let mut ranked = rank_by_similarity(
            &query_embedding,
            entries.iter().map(|e| e.embedding.as_slice()),
            entries.len(),
            self.min_score,
        );
        ranked.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    entries[*b]
                        .salience
                        .partial_cmp(&entries[*a].salience)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| entries[*b].created_at.cmp(&entries[*a].created_at))
        });
        ranked.truncate(top_k);
        debug!(hits = ranked.len(), total = entries.len(), "Semantic search");

        ranked
            .into_iter()
            .map(|(i, _)| entries[i].turn.clone())
            .collect()
    }

    async fn store(&self, turn: Turn, salience: f32) -> Result<(), MemoryError> {
        let embedding = self.embedder.embed(&turn.content).await?;
        let entry = StoredTurn {
            turn,
            salience,
            embedding,
            created_at: Utc::now(),
        };
        debug!(salience = entry.salience, "Promoted turn to long-term memory");
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

/// A retrieval store that remembers nothing.
pub struct NoRetrieval;

#[async_trait]
impl RetrievalStore for NoRetrieval {
    fn name(&self) -> &str {
        "none"
    }

    async fn search(&self, _query: &str, _top_k: usize) -> Vec<Turn> {
        Vec::new()
    }

    async fn store(&self, _turn: Turn, _salience: f32) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), MemoryError> {
        Ok(())
    }
}
