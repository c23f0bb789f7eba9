//! Feature-hashing embedder.
//!
//! Lowercased word tokens and their character trigrams are hashed into a
//! fixed number of buckets and the result is L2-normalized. No model files,
//! deterministic across runs.

use async_trait::async_trait;
use companion_core::error::MemoryError;
use companion_core::memory::Embedder;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        ((h >> 1) as usize % self.dimensions, sign)
    }

    /// Synchronous embedding; never fails.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        let lower = text.to_lowercase();

        for word in lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
        {
            let (i, sign) = self.bucket(word);
            v[i] += sign;

            let chars: Vec<char> = word.chars().collect();
            for gram in chars.windows(3) {
                let gram: String = gram.iter().collect();
                let (i, sign) = self.bucket(&format!("#{gram}"));
                v[i] += 0.5 * sign;
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.embed_sync(text))
    }
}
