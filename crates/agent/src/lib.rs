//! The conversational core of Companion.
//!
//! Each connection gets a [`SessionOrchestrator`] that turns user text
//! into persona-consistent replies:
//!
//! 1. **Receive** user text, update mode flags, append it to history
//! 2. **Screen** it for illegal intent (refuse without a backend call)
//! 3. **Feel** it: classify the text and fold it into the mood
//! 4. **Assemble** context from memory chips, recalled turns, the dialogue
//!    tail, guardrail notes and a hidden plan
//! 5. **Generate** through self-consistency voting, or a citation-backed
//!    answer when browsing applies
//! 6. **Post-process** (identity, one-word mode, boundaries) and emit
//!
//! Generation runs in a cancellable task; at most one per session.

pub mod assembler;
pub mod classifier;
pub mod event;
pub mod filter;
pub mod heuristics;
pub mod mood;
pub mod orchestrator;
pub mod voting;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assembler::{ContextAssembler, Recall};
pub use classifier::LexiconClassifier;
pub use event::{SessionEvent, Utterance};
pub use filter::ContentFilter;
pub use mood::{MoodEngine, MoodSimulator};
pub use orchestrator::{Dispatch, ModeFlags, SessionDeps, SessionOrchestrator};
pub use voting::VotingGenerator;
