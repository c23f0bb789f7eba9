//! Mood dynamics.
//!
//! Each emotion has a slow-inertia base and a fast-decaying spike; the
//! observed mood is their clamped sum, shifted by a negativity bias that
//! builds up from sad, angry and fearful events and fades over time.
//! All rates are expressed per elapsed second, so irregular update
//! intervals behave the same as regular ones.

use companion_core::classify::EmotionClassifier;
use companion_core::mood::{Emotion, MoodVector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::SessionEvent;

/// Fraction of the base kept per `INERTIA_PERIOD` seconds.
const INERTIA: f32 = 0.995;
const INERTIA_PERIOD: f32 = 0.1;

/// Fraction of a spike kept per `SPIKE_PERIOD` seconds.
const SPIKE_DECAY: f32 = 0.7;
const SPIKE_PERIOD: f32 = 0.25;

/// Fraction of the negativity bias kept per `BIAS_PERIOD` seconds.
const BIAS_DECAY: f32 = 0.995;
const BIAS_PERIOD: f32 = 0.5;

const EVENT_GAIN: f32 = 0.2;
const SPIKE_GAIN: f32 = 0.6;
const BIAS_GAIN: f32 = 0.15;
const BIAS_JOY_DRAG: f32 = 0.4;
const BIAS_SADNESS_PUSH: f32 = 0.3;

/// Elapsed time attributed to a classified message.
pub const MESSAGE_DT: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct MoodEngine {
    base: MoodVector,
    spike: MoodVector,
    negative_bias: f32,
    observed: MoodVector,
}

impl Default for MoodEngine {
    fn default() -> Self {
        Self::new(MoodVector::baseline())
    }
}

impl MoodEngine {
    pub fn new(initial: MoodVector) -> Self {
        let initial = initial.clamped();
        Self {
            base: initial,
            spike: MoodVector::zero(),
            negative_bias: 0.0,
            observed: initial,
        }
    }

    pub fn current(&self) -> MoodVector {
        self.observed
    }

    pub fn negative_bias(&self) -> f32 {
        self.negative_bias
    }

    /// Fold one event in after `dt` seconds and return the observed mood.
    ///
    /// Negative, NaN, or infinite `dt` counts as no elapsed time; event
    /// values are clamped into `[0, 1]` first.
    pub fn update(&mut self, event: &MoodVector, dt: f32) -> MoodVector {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let event = event.clamped();

        self.negative_bias *= BIAS_DECAY.powf(dt / BIAS_PERIOD);
        let negativity = (event.sadness + event.anger + event.fear - event.joy).max(0.0);
        self.negative_bias += negativity * BIAS_GAIN;

        let inertia = INERTIA.powf(dt / INERTIA_PERIOD);
        let spike_decay = SPIKE_DECAY.powf(dt / SPIKE_PERIOD);

        for emotion in Emotion::ALL {
            let evidence = event.get(emotion);
            let base = self.base.get(emotion);
            let target = (base + EVENT_GAIN * evidence).clamp(0.0, 1.0);
            self.base.set(emotion, base * inertia + target * (1.0 - inertia));

            let spike = self.spike.get(emotion) * spike_decay + SPIKE_GAIN * evidence;
            self.spike.set(emotion, spike.clamp(0.0, 1.0));
        }

        let mut observed = self.base;
        for emotion in Emotion::ALL {
            observed.add(emotion, self.spike.get(emotion));
        }
        observed.add(Emotion::Joy, -BIAS_JOY_DRAG * self.negative_bias);
        observed.add(Emotion::Sadness, BIAS_SADNESS_PUSH * self.negative_bias);

        self.observed = observed.clamped();
        self.observed
    }
}

/// A session's mood engine plus the classifier that feeds it.
#[derive(Clone)]
pub struct MoodSimulator {
    engine: Arc<Mutex<MoodEngine>>,
    classifier: Arc<dyn EmotionClassifier>,
}

impl MoodSimulator {
    pub fn new(classifier: Arc<dyn EmotionClassifier>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(MoodEngine::default())),
            classifier,
        }
    }

    pub async fn snapshot(&self) -> MoodVector {
        self.engine.lock().await.current()
    }

    pub async fn apply(&self, event: &MoodVector, dt: f32) -> MoodVector {
        self.engine.lock().await.update(event, dt)
    }

    /// Classify `text` and fold the result in.
    pub async fn apply_text(&self, text: &str, dt: f32) -> MoodVector {
        let event = self.classifier.classify(text);
        self.apply(&event, dt).await
    }

    /// Tick the mood every `tick` with a zero event, pushing each state to
    /// `events`. Stops on cancellation or when the receiver is gone.
    pub fn spawn_ticker(
        &self,
        tick: Duration,
        events: mpsc::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let sim = self.clone();
        tokio::spawn(async move {
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(tick) => {}
                }

                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                let mood = sim.apply(&MoodVector::zero(), dt).await;
                if events.send(SessionEvent::Mood { mood }).await.is_err() {
                    debug!("Mood receiver closed, stopping ticker");
                    break;
                }
            }
        })
    }
}
