//! Pattern-table text heuristics.
//!
//! Every predicate and rewrite here is a pure function over text so each
//! can be tested on its own. Predicates that take `lower` expect the
//! caller to have lowercased the input already.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Phrases that mark a question about who the companion is.
const IDENTITY_QUESTIONS: &[&str] = &[
    "who are you",
    "who r u",
    "what are you",
    "your name",
    "who is she",
    "who is this",
];

/// Recency, time, and place words that suggest the answer needs fresh sources.
const BROWSE_TRIGGERS: &[&str] = &[
    "today",
    "latest",
    "news",
    "release",
    "near me",
    "schedule",
    "update",
    "now",
    "this week",
    "2025",
    "price",
    "tickets",
];

/// Words that make a user turn worth remembering long-term.
const SALIENT_WORDS: &[&str] = &["sorry", "promise", "left me", "hate you", "love you", "cheated"];

const EXPLANATION_WORDS: &[&str] = &["explain", "why", "how", "details"];

pub const SALIENT: f32 = 0.6;
pub const ORDINARY: f32 = 0.2;

static ONE_WORD_ON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(one|single)\s+word\b").expect("valid one-word regex"));

static ONE_WORD_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(normal|full(\s+sentences)?|talk\s+normally)\b").expect("valid normal-mode regex")
});

static WHO_ARE_YOU: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bwho\s+are\s+you\b|\bwho\s*r\s*u\b").expect("valid who-are-you regex")
});

static WHO_MADE_YOU: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bwho\s+made\s+(you|u)\b").expect("valid origin regex"));

static GREETING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(hi+|hey+|hello|yo|sup)\b").expect("valid greeting regex"));

static COLD_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*hey\s*—?\s*i['’]?m\s*[a-z]+\.?\s*what['’]?s\s*up\?\s*")
        .expect("valid cold-open regex")
});

static FIRST_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z\-']*").expect("valid word regex"));

static SELF_NAMING: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\bI\s*am\s+[A-Z][a-zA-Z]+\b").expect("valid i-am regex"),
        Regex::new(r"\bI'm\s+[A-Z][a-zA-Z]+\b").expect("valid i'm regex"),
        Regex::new(r"\bMy\s+name\s+is\s+[A-Z][a-zA-Z]+\b").expect("valid my-name regex"),
    ]
});

/// The fixed first-turn greeting.
pub fn cold_open_greeting(name: &str) -> String {
    format!("Hey — I'm {name}. What's up?")
}

pub fn is_identity_question(lower: &str) -> bool {
    IDENTITY_QUESTIONS.iter().any(|q| lower.contains(q))
}

/// `Some(true)` to enter one-word mode, `Some(false)` to leave it.
/// Leaving wins when both appear.
pub fn one_word_toggle(lower: &str) -> Option<bool> {
    if ONE_WORD_OFF.is_match(lower) {
        Some(false)
    } else if ONE_WORD_ON.is_match(lower) {
        Some(true)
    } else {
        None
    }
}

pub fn is_who_are_you(lower: &str) -> bool {
    WHO_ARE_YOU.is_match(lower)
}

pub fn is_origin_question(lower: &str) -> bool {
    WHO_MADE_YOU.is_match(lower)
}

pub fn is_greeting(lower: &str) -> bool {
    GREETING.is_match(lower)
}

pub fn needs_browsing(text: &str) -> bool {
    let lower = text.to_lowercase();
    BROWSE_TRIGGERS.iter().any(|w| lower.contains(w))
}

/// Whether the user asked for an explanation rather than chatting.
pub fn is_explicit(text: &str) -> bool {
    let lower = text.to_lowercase();
    EXPLANATION_WORDS.iter().any(|w| lower.contains(w))
}

/// Salience of a user turn.
pub fn user_salience(text: &str) -> f32 {
    let lower = text.to_lowercase();
    if SALIENT_WORDS.iter().any(|w| lower.contains(w)) {
        SALIENT
    } else {
        ORDINARY
    }
}

/// First alphabetic token of `text`, or `fallback` if there is none.
pub fn to_one_word(text: &str, fallback: &str) -> String {
    FIRST_WORD
        .find(text.trim())
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Capitalize the first character.
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

/// Rewrite self-introductions to `name` and undo replies that call the
/// user by the companion's name.
pub fn enforce_identity(text: &str, name: &str) -> String {
    let replacement = format!("I'm {name}");
    let mut out = text.to_string();
    for re in SELF_NAMING.iter() {
        out = re.replace_all(&out, replacement.as_str()).into_owned();
    }
    // the user being called by the persona's own name
    let pattern = format!(r"(?i)\byou(?:'re| are)\s+{}\b", regex_lite::escape(name));
    match Regex::new(&pattern) {
        Ok(misattributed) => misattributed.replace_all(&out, replacement.as_str()).into_owned(),
        Err(_) => out,
    }
}

/// Strip a leading cold-open greeting.
pub fn strip_cold_open(text: &str) -> String {
    COLD_OPEN.replace(text, "").into_owned()
}

/// Whether `text` is nothing but a cold-open greeting.
pub fn is_bare_greeting(text: &str) -> bool {
    COLD_OPEN.is_match(text) && strip_cold_open(text).trim().is_empty()
}

/// Placeholder filler the backend sometimes emits instead of a reply.
pub fn is_filler(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "wait." | "wait" | "thinking." | "thinking"
    )
}

/// Long reply that stops without terminal punctuation.
pub fn is_truncated(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed.split_whitespace().count() > 80
        && !trimmed.ends_with(['.', '!', '?'])
}

/// Cut to at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
