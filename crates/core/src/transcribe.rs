//! Transcription contract (optional subsystem).
//!
//! Raw PCM is pushed in; partial text arrives through a callback while
//! speech is ongoing, and finalized text after a stability timeout.

use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked with transcribed text.
pub type TranscriptCallback = Arc<dyn Fn(String) + Send + Sync>;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Begin transcribing; `on_partial` and `on_final` may be called from
    /// any task until `stop` returns.
    async fn start(&self, on_partial: TranscriptCallback, on_final: TranscriptCallback);

    /// Push 16-bit little-endian mono PCM.
    fn push_audio(&self, pcm: &[u8]);

    async fn stop(&self);
}
