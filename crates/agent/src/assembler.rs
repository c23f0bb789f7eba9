//! Context assembly: what the generator sees for one reply.
//!
//! Ordering is fixed:
//! 1. memory-chip injections (system)
//! 2. retrieved long-term turns, then recent short-term turns
//! 3. the tail of the live dialogue
//! 4. mode and guardrail notes (system)
//! 5. the turn plan (system), always last

use companion_core::message::{Role, Turn};
use companion_memory::MemoryHub;
use std::collections::HashSet;

use crate::heuristics::{is_explicit, truncate_chars};

/// Longest cue kept, in characters.
pub const CUE_CHAR_CAP: usize = 180;

/// Fallback cue length taken from the last user message.
pub const LAST_USER_CUE_CAP: usize = 120;

pub const MAX_CUES: usize = 3;

/// Dialogue turns the retrieval query is built from.
const RETRIEVAL_QUERY_TURNS: usize = 3;

/// What memory recalled for the current dialogue.
#[derive(Debug, Clone, Default)]
pub struct Recall {
    /// Content of every chip whose keyword appears in the last user text.
    pub chips: Vec<String>,
    pub retrieved: Vec<Turn>,
    pub recent: Vec<Turn>,
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    pub recent_window: usize,
    pub retrieval_top_k: usize,
    /// Live dialogue turns copied verbatim into the context.
    pub history_tail: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            recent_window: 12,
            retrieval_top_k: 3,
            history_tail: 6,
        }
    }
}

impl ContextAssembler {
    pub fn from_config(config: &companion_config::MemoryConfig) -> Self {
        Self {
            recent_window: config.recent_window,
            retrieval_top_k: config.retrieval_top_k,
            ..Self::default()
        }
    }

    /// Query every memory layer. Retrieval failures come back empty.
    pub async fn recall(&self, memory: &MemoryHub, history: &[Turn], last_user: &str) -> Recall {
        let query = history
            .iter()
            .rev()
            .take(RETRIEVAL_QUERY_TURNS)
            .rev()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let recent = memory.recent(self.recent_window).await;
        let retrieved = if query.trim().is_empty() {
            Vec::new()
        } else {
            memory.retrieve(&query, self.retrieval_top_k).await
        };
        let chips = memory.chips.match_for_text(last_user).await;

        Recall {
            chips,
            retrieved,
            recent,
        }
    }

    /// Build the ordered context.
    pub fn assemble(&self, recall: &Recall, history: &[Turn], notes: &[String], plan: &str) -> Vec<Turn> {
        let tail_start = history.len().saturating_sub(self.history_tail);

        let mut context: Vec<Turn> = recall
            .chips
            .iter()
            .map(|c| Turn::system(format!("[MemoryChip] {c}")))
            .collect();
        context.extend(recall.retrieved.iter().cloned());
        context.extend(recall.recent.iter().cloned());
        context.extend(history[tail_start..].iter().cloned());
        context.extend(notes.iter().map(|n| Turn::system(n.clone())));
        context.push(Turn::system(plan));
        context
    }
}

/// Up to three short, distinct reminders drawn from memory, falling back
/// to the start of the last user message.
pub fn distill_cues(recall: &Recall, last_user: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut cues = Vec::new();

    for turn in recall.retrieved.iter().chain(recall.recent.iter()) {
        let text = turn.content.trim();
        if text.is_empty() {
            continue;
        }
        let cue = truncate_chars(text, CUE_CHAR_CAP);
        if seen.insert(cue.to_lowercase()) {
            cues.push(cue);
        }
        if cues.len() >= MAX_CUES {
            break;
        }
    }

    if cues.is_empty() && !last_user.trim().is_empty() {
        cues.push(truncate_chars(last_user, LAST_USER_CUE_CAP));
    }
    cues
}

/// Hidden guidance for the next reply.
pub fn make_plan(last_user: &str, cues: &[String], turn_count: usize) -> String {
    let explicitness = if is_explicit(last_user) { "explicit" } else { "implicit" };
    let beats = if turn_count < 4 { 1 } else { 2 };
    let tone = if turn_count < 8 { "casual" } else { "warm" };
    format!(
        "Internal guidance (do not reveal): tone={tone}; explicitness={explicitness}; beats={beats}; 1–3 sentences. \
         Use cues sparingly: {}. Do not mention any planning, system notes, or that you're figuring things out.",
        cues.join("; ")
    )
}

/// Number of user turns in the dialogue so far.
pub fn user_turn_count(history: &[Turn]) -> usize {
    history.iter().filter(|t| t.role == Role::User).count()
}
