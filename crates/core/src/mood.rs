//! Mood vector: fixed-key emotion intensities.
//!
//! Every key is independent and lives in `[0, 1]`; the vector is not a
//! probability simplex and its total is never normalized.

use serde::{Deserialize, Serialize};

/// The fixed emotion key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Joy,
    Sadness,
    Anger,
    Fear,
    Surprise,
    Disgust,
}

impl Emotion {
    pub const ALL: [Emotion; 6] = [
        Emotion::Joy,
        Emotion::Sadness,
        Emotion::Anger,
        Emotion::Fear,
        Emotion::Surprise,
        Emotion::Disgust,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Joy => "joy",
            Emotion::Sadness => "sadness",
            Emotion::Anger => "anger",
            Emotion::Fear => "fear",
            Emotion::Surprise => "surprise",
            Emotion::Disgust => "disgust",
        }
    }
}

/// Emotion intensities, serialized as `{"joy": .., "sadness": .., ...}`.
///
/// Also used as the shape of classifier events, where values are raw
/// evidence rather than observed state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoodVector {
    pub joy: f32,
    pub sadness: f32,
    pub anger: f32,
    pub fear: f32,
    pub surprise: f32,
    pub disgust: f32,
}

impl MoodVector {
    /// The resting mood a fresh session starts from.
    pub fn baseline() -> Self {
        Self {
            joy: 0.3,
            sadness: 0.2,
            anger: 0.1,
            fear: 0.1,
            surprise: 0.1,
            disgust: 0.0,
        }
    }

    /// The all-zero event used by the periodic tick.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, emotion: Emotion) -> f32 {
        match emotion {
            Emotion::Joy => self.joy,
            Emotion::Sadness => self.sadness,
            Emotion::Anger => self.anger,
            Emotion::Fear => self.fear,
            Emotion::Surprise => self.surprise,
            Emotion::Disgust => self.disgust,
        }
    }

    pub fn set(&mut self, emotion: Emotion, value: f32) {
        let slot = match emotion {
            Emotion::Joy => &mut self.joy,
            Emotion::Sadness => &mut self.sadness,
            Emotion::Anger => &mut self.anger,
            Emotion::Fear => &mut self.fear,
            Emotion::Surprise => &mut self.surprise,
            Emotion::Disgust => &mut self.disgust,
        };
        *slot = value;
    }

    /// Add `value` to one key (no clamping).
    pub fn add(&mut self, emotion: Emotion, value: f32) {
        self.set(emotion, self.get(emotion) + value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.iter().map(move |e| (*e, self.get(*e)))
    }

    /// Clamp every key into `[0, 1]`. NaN collapses to 0.
    pub fn clamped(mut self) -> Self {
        for e in Emotion::ALL {
            let v = self.get(e);
            let v = if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
            self.set(e, v);
        }
        self
    }

    /// Whether every key is inside `[0, 1]`.
    pub fn is_bounded(&self) -> bool {
        self.iter().all(|(_, v)| (0.0..=1.0).contains(&v))
    }

    /// The key with the highest intensity (first wins on ties).
    pub fn dominant(&self) -> Emotion {
        let mut best = Emotion::Joy;
        for (e, v) in self.iter() {
            if v > self.get(best) {
                best = e;
            }
        }
        best
    }
}

impl std::fmt::Display for MoodVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(e, v)| format!("{}: {:.2}", e.as_str(), v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_bounded() {
        assert!(MoodVector::baseline().is_bounded());
    }

    #[test]
    fn clamped_pulls_values_into_range() {
        let mut v = MoodVector::zero();
        v.joy = 1.7;
        v.anger = -0.4;
        v.fear = f32::NAN;
        let c = v.clamped();
        assert_eq!(c.joy, 1.0);
        assert_eq!(c.anger, 0.0);
        assert_eq!(c.fear, 0.0);
        assert!(c.is_bounded());
    }

    #[test]
    fn serializes_as_key_map() {
        let json = serde_json::to_value(MoodVector::baseline()).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 6);
        assert!(json.get("disgust").is_some());
    }

    #[test]
    fn dominant_picks_highest() {
        let mut v = MoodVector::baseline();
        v.sadness = 0.9;
        assert_eq!(v.dominant(), Emotion::Sadness);
    }
}
