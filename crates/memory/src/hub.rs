//! The three memory layers behind one handle.

use companion_core::memory::{RetrievalStore, ShortTermStore};
use companion_core::message::Turn;
use std::sync::Arc;
use tracing::warn;

use crate::chips::ChipStore;
use crate::embed::HashingEmbedder;
use crate::semantic::SemanticMemory;
use crate::short_term::RecentTurns;

/// Short-term log, long-term retrieval, and memory chips.
///
/// `remember` always writes short-term and promotes turns whose salience
/// reaches the threshold into long-term memory.
#[derive(Clone)]
pub struct MemoryHub {
    pub short_term: Arc<dyn ShortTermStore>,
    pub long_term: Arc<dyn RetrievalStore>,
    pub chips: Arc<ChipStore>,
    promotion_threshold: f32,
}

impl MemoryHub {
    pub fn new(
        short_term: Arc<dyn ShortTermStore>,
        long_term: Arc<dyn RetrievalStore>,
        chips: Arc<ChipStore>,
        promotion_threshold: f32,
    ) -> Self {
        Self {
            short_term,
            long_term,
            chips,
            promotion_threshold,
        }
    }

    /// Default stores sized from configuration.
    pub fn from_config(config: &companion_config::MemoryConfig) -> Self {
        Self::new(
            Arc::new(RecentTurns::new(config.short_term_capacity)),
            Arc::new(SemanticMemory::new(Arc::new(HashingEmbedder::new(
                config.embedding_dimensions,
            )))),
            Arc::new(ChipStore::open(config.chips_path())),
            config.promotion_threshold,
        )
    }

    pub fn promotion_threshold(&self) -> f32 {
        self.promotion_threshold
    }

    pub async fn remember(&self, turn: Turn, salience: f32) {
        if salience >= self.promotion_threshold {
            if let Err(e) = self.long_term.store(turn.clone(), salience).await {
                warn!(error = %e, "Long-term promotion failed");
            }
        }
        self.short_term.append(turn, salience).await;
    }

    pub async fn recent(&self, n: usize) -> Vec<Turn> {
        self.short_term.recent(n).await
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Vec<Turn> {
        self.long_term.search(query, top_k).await
    }

    /// Forget short-term, long-term, and chips.
    pub async fn reset(&self) {
        self.short_term.clear().await;
        if let Err(e) = self.long_term.clear().await {
            warn!(error = %e, "Failed to clear long-term memory");
        }
        if let Err(e) = self.chips.clear().await {
            warn!(error = %e, "Failed to clear memory chips");
        }
    }
}
