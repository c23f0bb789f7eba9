//! Keyword-lexicon emotion classifier.

use companion_core::classify::EmotionClassifier;
use companion_core::mood::{Emotion, MoodVector};

const LEXICON: &[(Emotion, &[&str])] = &[
    (
        Emotion::Joy,
        &[
            "happy", "glad", "love", "great", "awesome", "fun", "yay", "haha", "lol", "excited",
            "nice", "thanks", "thank you", "amazing", "cute", "sweet",
        ],
    ),
    (
        Emotion::Sadness,
        &[
            "sad", "miss", "lonely", "cry", "crying", "sorry", "hurt", "tired", "down", "left me",
            "depressed", "alone",
        ],
    ),
    (
        Emotion::Anger,
        &[
            "angry", "mad", "hate", "annoyed", "furious", "pissed", "stupid", "cheated", "ugh",
        ],
    ),
    (
        Emotion::Fear,
        &[
            "scared", "afraid", "worried", "nervous", "anxious", "panic", "terrified", "fear",
        ],
    ),
    (
        Emotion::Surprise,
        &["wow", "whoa", "omg", "really?", "no way", "surprise", "unexpected", "wait what"],
    ),
    (
        Emotion::Disgust,
        &["gross", "disgusting", "ew", "eww", "nasty", "yuck"],
    ),
];

/// Counts lexicon hits per emotion and normalizes them into a
/// distribution, so the event sums to 1 when anything matched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }
}

fn count_hits(lower: &str, words: &[&str]) -> usize {
    words
        .iter()
        .filter(|w| {
            if w.contains(' ') || w.ends_with('?') {
                lower.contains(*w)
            } else {
                lower
                    .split(|c: char| !c.is_alphanumeric() && c != '\'')
                    .any(|token| token == **w)
            }
        })
        .count()
}

impl EmotionClassifier for LexiconClassifier {
    fn classify(&self, text: &str) -> MoodVector {
        let lower = text.to_lowercase();
        let mut event = MoodVector::zero();
        if lower.trim().is_empty() {
            return event;
        }

        let mut total = 0usize;
        for (emotion, words) in LEXICON {
            let hits = count_hits(&lower, words);
            event.set(*emotion, hits as f32);
            total += hits;
        }
        if total == 0 {
            return event;
        }

        for emotion in Emotion::ALL {
            event.set(emotion, event.get(emotion) / total as f32);
        }
        event
    }
}
