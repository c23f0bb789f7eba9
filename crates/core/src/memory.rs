//! Memory traits: short-term turn log, semantic retrieval, and chips.
//!
//! The companion remembers at three levels:
//! - Short-term: a bounded log of recent turns (oldest evicted first)
//! - Long-term: salient turns embedded for similarity search
//! - Memory chips: small fixed facts injected when their keywords appear

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;
use crate::message::Turn;

/// Maximum keywords kept per chip.
pub const MAX_CHIP_KEYWORDS: usize = 5;

/// Bounded recent-turn log.
#[async_trait]
pub trait ShortTermStore: Send + Sync {
    /// Append a turn; evicts the oldest entry when full.
    async fn append(&self, turn: Turn, salience: f32);

    /// Up to `n` most recent turns, in chronological order.
    async fn recent(&self, n: usize) -> Vec<Turn>;

    async fn clear(&self);
}

/// Similarity search over embedded turns.
///
/// Retrieval is fail-open: `search` never errors, it returns an empty list
/// and logs instead.
#[async_trait]
pub trait RetrievalStore: Send + Sync {
    /// The backend name (e.g., "semantic", "none").
    fn name(&self) -> &str;

    /// Top-k most similar turns, best first.
    async fn search(&self, query: &str, top_k: usize) -> Vec<Turn>;

    /// Embed and store a turn.
    async fn store(&self, turn: Turn, salience: f32) -> Result<(), MemoryError>;

    async fn clear(&self) -> Result<(), MemoryError>;
}

/// Text → dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// A small fixed fact injected into context when a keyword matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChip {
    /// Unique key; adds are upserts by name.
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl MemoryChip {
    /// Build a chip, keeping at most [`MAX_CHIP_KEYWORDS`] keywords.
    pub fn new(name: impl Into<String>, content: impl Into<String>, keywords: Vec<String>) -> Self {
        let mut keywords = keywords;
        keywords.truncate(MAX_CHIP_KEYWORDS);
        Self {
            name: name.into(),
            content: content.into(),
            keywords,
        }
    }

    /// Pure substring containment, case-sensitive to the keyword as stored.
    pub fn matches(&self, text: &str) -> bool {
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && text.contains(k.as_str()))
    }
}
