//! Error types for the Companion domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Companion operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generation backend errors ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Browsing errors ---
    #[error("Browse error: {0}")]
    Browse(#[from] BrowseError),

    // --- Session protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures from a generation backend (transport, HTTP, parse).
///
/// These are retried inside the backend adapter and never reach the
/// connection as a protocol failure.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned HTTP {status_code}: {message}")]
    Http { status_code: u16, message: String },

    #[error("Failed to parse backend response: {0}")]
    Parse(String),

    #[error("Backend response contained no text")]
    EmptyResponse,

    #[error("Backend not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl GenerationError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotConfigured(_))
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Persistence failed for {path}: {reason}")]
    Persistence { path: String, reason: String },
}

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("Search request failed: {0}")]
    Search(String),

    #[error("Page fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Browsing disabled")]
    Disabled,
}

/// A malformed inbound session event.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json")]
    InvalidJson,

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} event: {reason}")]
    Malformed { kind: String, reason: String },
}
