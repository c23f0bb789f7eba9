//! Self-consistency voting over several backend samples.

use companion_core::error::GenerationError;
use companion_core::generator::{GenerationRequest, Generator};
use companion_providers::prompt::EMPTY_REPLY;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::filter::ContentFilter;

/// Samples `n` completions and keeps the shortest non-empty one.
///
/// With `n == 1` this is a single filtered call whose error propagates.
/// With `n > 1` failures are independent: failed or empty candidates are
/// dropped, and if none survive the reply is the minimal fallback. Every
/// candidate is damped against the repetition cache as it stood before the
/// vote; only the winner is recorded.
pub struct VotingGenerator {
    generator: Arc<dyn Generator>,
    filter: Arc<ContentFilter>,
    n: usize,
}

impl VotingGenerator {
    pub fn new(generator: Arc<dyn Generator>, filter: Arc<ContentFilter>, n: usize) -> Self {
        Self {
            generator,
            filter,
            n: n.max(1),
        }
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let ban = request.ban_pattern.clone();

        if self.n == 1 {
            let raw = self.generator.generate(request).await?;
            return Ok(self.filter.filter_text(&raw, &ban));
        }

        let calls = (0..self.n).map(|_| self.generator.generate(request.clone()));
        let results = join_all(calls).await;

        let mut candidates = Vec::with_capacity(self.n);
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(raw) => {
                    let text = self.filter.damp(&raw, &ban);
                    if !text.trim().is_empty() {
                        candidates.push(text);
                    }
                }
                Err(e) => warn!(candidate = i, error = %e, "Candidate generation failed"),
            }
        }

        debug!(
            backend = self.generator.name(),
            requested = self.n,
            surviving = candidates.len(),
            "Self-consistency vote"
        );

        // min_by_key keeps the first of equal minima
        match candidates.into_iter().min_by_key(|c| c.chars().count()) {
            Some(chosen) => {
                self.filter.remember(&chosen);
                Ok(chosen)
            }
            None => Ok(EMPTY_REPLY.to_string()),
        }
    }
}
