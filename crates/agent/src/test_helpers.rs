//! Scripted generators for tests.

use async_trait::async_trait;
use companion_core::error::GenerationError;
use companion_core::generator::{GenerationRequest, Generator};
use std::sync::Mutex;
use std::time::Duration;

/// Returns scripted replies in call order, repeating the last one once
/// the script runs out. Records every request it receives.
pub struct ScriptedGenerator {
    replies: Vec<String>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<&str>) -> Self {
        assert!(!replies.is_empty(), "ScriptedGenerator needs at least one reply");
        Self {
            replies: replies.into_iter().map(String::from).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let mut calls = self.calls.lock().unwrap();
        let index = calls.len().min(self.replies.len() - 1);
        calls.push(request);
        Ok(self.replies[index].clone())
    }
}

/// Always fails with a retryable network error.
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
        Err(GenerationError::Network("connection refused".into()))
    }
}

/// Sleeps before answering, for cancellation tests under paused time.
pub struct SlowGenerator {
    pub delay: Duration,
    pub reply: String,
}

impl SlowGenerator {
    pub fn new(delay: Duration, reply: &str) -> Self {
        Self {
            delay,
            reply: reply.to_string(),
        }
    }
}

#[async_trait]
impl Generator for SlowGenerator {
    fn name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}
