//! Session-level events.
//!
//! `SessionEvent` is what the orchestrator and the mood loop emit; the
//! gateway maps each event onto wire frames for the client.

use companion_core::message::Citation;
use companion_core::mood::MoodVector;
use serde::Serialize;

/// One completed reply, ready to be spoken.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    /// Unique per utterance.
    pub id: String,
    pub text: String,
    /// Mood after folding in the reply text.
    pub emotion: MoodVector,
    /// Present only when browsing augmentation ran.
    pub citations: Vec<Citation>,
    /// Long reply without terminal punctuation.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Current mood vector.
    Mood { mood: MoodVector },

    /// A generation started (`true`) or finished either way (`false`).
    Processing { on: bool },

    /// A generation completed; maps to an `utterance_start`/`utterance_end` pair.
    Utterance(Utterance),

    /// A generation was cancelled before producing a reply.
    Canceled,
}

impl SessionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Mood { .. } => "mood",
            Self::Processing { .. } => "processing",
            Self::Utterance(_) => "utterance",
            Self::Canceled => "canceled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_event_serialization() {
        let event = SessionEvent::Mood {
            mood: MoodVector::baseline(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mood");
        assert!(json["mood"]["joy"].is_number());
    }

    #[test]
    fn event_types() {
        assert_eq!(SessionEvent::Canceled.event_type(), "canceled");
        assert_eq!(SessionEvent::Processing { on: true }.event_type(), "processing");
    }
}
