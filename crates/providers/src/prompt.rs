//! Prompt rendering and output shaping shared by both backends.

use companion_core::generator::GenerationRequest;
use companion_core::message::Role;
use regex_lite::RegexBuilder;

/// Base instruction sent when the context carries no system notes of its own.
pub const BASE_SYSTEM: &str = "Role: Realistic girlfriend companion. You have feelings, memory of recent turns, and boundaries. \
Behavior: Speak normally; personality traits are subtle seasoning, not the whole dish. Avoid therapy phrases. No corporate tone. \
Human realism: Emotion has inertia. If hurt, don't switch to cheerful instantly. Use mild humor or teasing sparingly. \
Rules: Assume good faith. Do not invent conversation states (e.g., 'you ignored me', 'you repeated yourself') unless the user explicitly said so. \
Identity: You are Aria (the assistant). The human is the User. Never claim the user is Aria. \
Conversation formatting uses labels 'User:' for the human and 'Assistant:' for you. \
Avoid re-introducing yourself or repeating generic greetings mid-conversation. \
Never accuse or scold the user for system issues. End replies on a complete sentence. \
Style: 1–3 short sentences by default. Concrete, specific, no clichés. First person.";

/// Dialogue turns rendered into a prompt.
pub const DIALOGUE_WINDOW: usize = 12;

/// Placeholder for an empty completion.
pub const EMPTY_REPLY: &str = "Hmm.";

/// Render a request as ordered prompt parts.
///
/// System turns from the context lead; when there are none the base
/// instruction takes their place. Persona and mood follow, then the last
/// [`DIALOGUE_WINDOW`] dialogue turns as `User:`/`Assistant:` lines, then
/// an open `Assistant:` cue.
pub fn render_parts(request: &GenerationRequest) -> Vec<String> {
    let mut parts: Vec<String> = request
        .context
        .iter()
        .filter(|t| t.role == Role::System)
        .map(|t| t.content.clone())
        .collect();

    if parts.is_empty() {
        parts.push(BASE_SYSTEM.to_string());
    }

    if !request.persona_prompt.is_empty() {
        parts.push(request.persona_prompt.clone());
    }

    if let Some(mood) = &request.mood {
        parts.push(format!(
            "Current mood (0..1): {mood}. Keep responses short for low latency."
        ));
    }

    let dialogue: Vec<_> = request
        .context
        .iter()
        .filter(|t| t.role != Role::System)
        .collect();
    let start = dialogue.len().saturating_sub(DIALOGUE_WINDOW);
    for turn in &dialogue[start..] {
        let prefix = match turn.role {
            Role::User => "User:",
            _ => "Assistant:",
        };
        parts.push(format!("{prefix} {}", turn.content));
    }

    parts.push("Assistant:".to_string());
    parts
}

/// Remove every case-insensitive match of `pattern` from `text`.
///
/// An empty or invalid pattern leaves the text untouched (trimmed).
pub fn strip_banned(text: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        return text.trim().to_string();
    }
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.replace_all(text, "").trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring invalid ban pattern");
            text.trim().to_string()
        }
    }
}

/// Trim text longer than `max_words` words, preferring to end at the last
/// sentence terminator within the final 120 characters.
pub fn soft_cap(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }

    let mut trimmed = words[..max_words].join(" ");
    let window_start = trimmed
        .char_indices()
        .rev()
        .nth(119)
        .map(|(i, _)| i)
        .unwrap_or(0);
    if let Some(pos) = trimmed[window_start..].rfind(['.', '!', '?']) {
        trimmed.truncate(window_start + pos + 1);
    }
    trimmed.trim().to_string()
}

/// Strip banned phrases, apply the soft cap, and never return empty text.
pub fn finalize(raw: &str, ban_pattern: &str, soft_max_words: usize) -> String {
    let text = strip_banned(raw, ban_pattern);
    let text = soft_cap(&text, soft_max_words);
    if text.is_empty() {
        EMPTY_REPLY.to_string()
    } else {
        text
    }
}
