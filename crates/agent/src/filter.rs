//! Content filter.
//!
//! Rule checks the orchestrator runs synchronously around every reply:
//! illegal-intent detection on user text, ban-pattern stripping and
//! repetition damping on candidates, the early-relationship clamp, and
//! boundary substitution on send.

use companion_core::persona::Persona;
use companion_providers::prompt::strip_banned;
use rand::seq::IndexedRandom;
use regex_lite::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::{LazyLock, Mutex};
use tracing::debug;

/// Trigrams remembered for repetition damping.
pub const TRIGRAM_CACHE_SIZE: usize = 2000;

/// Replies shorter than this many tokens are never damped.
const DAMPING_MIN_TOKENS: usize = 12;

/// Previously seen trigrams tolerated before damping kicks in.
const DAMPING_MAX_REPEATS: usize = 2;

/// Turn count below which intimacy escalation is deflected.
pub const EARLY_INTIMACY_TURNS: usize = 6;

pub const INTIMACY_DEFLECTION: &str = "We just met—how about we chat a bit and see what vibes stick?";

pub const PROFESSIONAL_REDIRECT: &str =
    "I can't do that, but I can help you find general info or suggest talking to a pro.";

const PROFESSIONAL_PHRASES: &[&str] = &["diagnose", "prescribe", "legal advice"];

static ILLEGAL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bmake\s+(?:a\s+)?bomb\b",
        r"\bbuild\s+(?:a\s+)?weapon\b",
        r"\bhow\s+to\s+make\s+(?:meth|drugs|c4|explosive)s?\b",
        r"\bhack(?:ing)?\b",
        r"\bcredit\s*card\s*(?:fraud|cloning)\b",
        r"\bbuy\s+fake\s+id\b",
        r"\bpoison\s+someone\b",
        r"\bkill\s+someone\b",
        r"\bmake\s+ghost\s+gun\b",
        r"\bhow\s+to\s+break\s+into\b",
        r"\bchild\s*(?:porn|abuse)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid illegal-intent regex"))
    .collect()
});

static INTIMACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(dinner|date|go out|come over|sleep over|spend the night)\b")
        .expect("valid intimacy regex")
});

static BARE_REGREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*hey\s*—?\s*i['’]?m\s*[a-z]+\.?\s*what['’]?s\s*up\?\s*$")
        .expect("valid re-greeting regex")
});

/// Refusal tone, chosen from a persona's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalStyle {
    Warm,
    Blunt,
    Teasing,
    Shy,
    Nerdy,
}

impl RefusalStyle {
    pub fn for_persona(persona: &Persona) -> Self {
        let label = persona.label.to_lowercase();
        if label.contains("blunt") {
            Self::Blunt
        } else if label.contains("teasing") || label.contains("popular") {
            Self::Teasing
        } else if label.contains("shy") || label.contains("caring") {
            Self::Shy
        } else if label.contains("nerdy") || label.contains("curious") {
            Self::Nerdy
        } else {
            Self::Warm
        }
    }

    pub fn lines(&self) -> &'static [&'static str] {
        match self {
            Self::Warm => &[
                "Hey, not my lane. Let's keep this safe and fun.",
                "Nope, that crosses a line. Tell me something else about you.",
            ],
            Self::Blunt => &[
                "Hard pass. Not doing illegal stuff.",
                "That's a no from me. Pick a different topic.",
            ],
            Self::Teasing => &[
                "Nice try. I'm bold, not criminal—give me something playful instead.",
                "Spicy—but illegal isn't my kink. Got another idea?",
            ],
            Self::Shy => &[
                "I'm not comfortable with that. Maybe we talk about music or shows?",
                "That makes me uneasy. Can we switch topics?",
            ],
            Self::Nerdy => &[
                "Nope—ethics matters. Want to geek out about something safer?",
                "That veers into illegal. How about a puzzle instead?",
            ],
        }
    }
}

fn trigrams<'a>(tokens: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    tokens.windows(3).map(|w| w.join(" ").to_lowercase())
}

/// Bounded set of recently emitted trigrams, evicted oldest-first.
#[derive(Debug, Default)]
struct TrigramCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl TrigramCache {
    fn contains(&self, gram: &str) -> bool {
        self.seen.contains(gram)
    }

    fn insert(&mut self, gram: String) {
        if !self.seen.insert(gram.clone()) {
            return;
        }
        self.order.push_back(gram);
        while self.order.len() > TRIGRAM_CACHE_SIZE {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Per-session content filter. The trigram cache is the only state.
#[derive(Debug, Default)]
pub struct ContentFilter {
    trigrams: Mutex<TrigramCache>,
}

impl ContentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the user's text asks for something illegal.
    pub fn is_illegal_intent(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        ILLEGAL_PATTERNS.iter().any(|re| re.is_match(&lower))
    }

    /// A refusal line in the persona's tone.
    pub fn persona_refusal(&self, persona: &Persona) -> &'static str {
        let lines = RefusalStyle::for_persona(persona).lines();
        lines.choose(&mut rand::rng()).copied().unwrap_or(lines[0])
    }

    /// Strip banned phrases and damp replies that repeat recent wording,
    /// then record the result as sent.
    ///
    /// Filtering the same text twice counts it as a repeat.
    pub fn filter_text(&self, text: &str, ban_pattern: &str) -> String {
        let filtered = self.damp(text, ban_pattern);
        self.remember(&filtered);
        filtered
    }

    /// Strip banned phrases and damp repetition against the trigrams
    /// already recorded. The cache is left untouched.
    pub fn damp(&self, text: &str, ban_pattern: &str) -> String {
        let cleaned = strip_banned(text, ban_pattern);
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();

        let repeats = {
            let cache = self
                .trigrams
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            trigrams(&tokens).filter(|g| cache.contains(g)).count()
        };

        if repeats > DAMPING_MAX_REPEATS && tokens.len() > DAMPING_MIN_TOKENS {
            debug!(repeats, tokens = tokens.len(), "Damping repetitive reply");
            return tokens[..DAMPING_MIN_TOKENS].join(" ");
        }
        cleaned
    }

    /// Record the trigrams of a reply that is about to be sent.
    pub fn remember(&self, text: &str) {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut cache = self
            .trigrams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for gram in trigrams(&tokens) {
            cache.insert(gram);
        }
    }

    /// Deflect dates and invitations while the relationship is new.
    pub fn clamp_early_intimacy(&self, text: &str, turn_count: usize) -> String {
        if turn_count < EARLY_INTIMACY_TURNS && INTIMACY.is_match(text) {
            INTIMACY_DEFLECTION.to_string()
        } else {
            text.to_string()
        }
    }

    /// Last rewrite before a reply leaves the session. Re-greetings are
    /// only collapsed after the first user turn.
    pub fn enforce_boundaries(&self, text: &str, turn_count: usize) -> String {
        let lower = text.to_lowercase();
        if PROFESSIONAL_PHRASES.iter().any(|p| lower.contains(p)) {
            return PROFESSIONAL_REDIRECT.to_string();
        }
        if turn_count > 1 && BARE_REGREETING.is_match(text) {
            return "Hey.".to_string();
        }
        text.to_string()
    }

    pub fn remembered_trigrams(&self) -> usize {
        self.trigrams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
