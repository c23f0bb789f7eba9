//! Emotion classifier contract.

use crate::mood::MoodVector;

/// Maps free text to an event vector of the same shape as the mood.
///
/// Values are evidence in `[0, 1]`; an empty text yields the zero vector.
pub trait EmotionClassifier: Send + Sync {
    fn classify(&self, text: &str) -> MoodVector;
}
