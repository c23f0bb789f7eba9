//! Memory system implementations for Companion.

pub mod chips;
pub mod embed;
pub mod hub;
pub mod semantic;
pub mod short_term;
pub mod vector;

pub use chips::ChipStore;
pub use embed::HashingEmbedder;
pub use hub::MemoryHub;
pub use semantic::{NoRetrieval, SemanticMemory};
pub use short_term::RecentTurns;
pub use vector::{cosine_similarity, rank_by_similarity};
