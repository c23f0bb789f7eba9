//! Generator trait: the abstraction over text-completion backends.
//!
//! A Generator takes an ordered context plus the active persona and mood,
//! and returns one completion. Implementations: hosted API, local model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::GenerationError;
use crate::message::Turn;
use crate::mood::MoodVector;

/// Everything a backend needs for a single completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Ordered context, front to back.
    pub context: Vec<Turn>,

    /// Mood snapshot rendered into the prompt, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<MoodVector>,

    /// Persona instruction text.
    #[serde(default)]
    pub persona_prompt: String,

    /// Alternation pattern of phrases the backend must strip (case-insensitive).
    #[serde(default)]
    pub ban_pattern: String,
}

impl GenerationRequest {
    pub fn new(context: Vec<Turn>) -> Self {
        Self {
            context,
            ..Self::default()
        }
    }

    pub fn with_mood(mut self, mood: MoodVector) -> Self {
        self.mood = Some(mood);
        self
    }

    pub fn with_persona(mut self, prompt: impl Into<String>, ban_pattern: impl Into<String>) -> Self {
        self.persona_prompt = prompt.into();
        self.ban_pattern = ban_pattern.into();
        self
    }
}

/// The core Generator trait.
///
/// The orchestrator calls `generate()` without knowing which backend is
/// behind it. Transport retries are the adapter's job, not the caller's.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A human-readable name for this backend (e.g., "hosted", "local").
    fn name(&self) -> &str;

    /// Produce one completion for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> Result<bool, GenerationError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = GenerationRequest::new(vec![Turn::user("hi")])
            .with_mood(MoodVector::baseline())
            .with_persona("Persona: warm", "as an ai");
        assert_eq!(req.context.len(), 1);
        assert!(req.mood.is_some());
        assert_eq!(req.ban_pattern, "as an ai");
    }
}
