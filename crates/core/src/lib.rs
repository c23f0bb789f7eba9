//! # Companion Core
//!
//! Domain types, traits, and error definitions for the Companion
//! conversational runtime. This crate has **zero framework dependencies**:
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (generation backend, memory stores, emotion
//! classifier, browsing, transcription) is defined as a trait here.
//! Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod browse;
pub mod classify;
pub mod error;
pub mod generator;
pub mod memory;
pub mod message;
pub mod mood;
pub mod persona;
pub mod transcribe;

// Re-export key types at crate root for ergonomics
pub use browse::{Source, SourceFetcher};
pub use classify::EmotionClassifier;
pub use error::{Error, Result};
pub use generator::{GenerationRequest, Generator};
pub use memory::{Embedder, MemoryChip, RetrievalStore, ShortTermStore};
pub use message::{Citation, Role, Turn};
pub use mood::{Emotion, MoodVector};
pub use persona::Persona;
pub use transcribe::Transcriber;
