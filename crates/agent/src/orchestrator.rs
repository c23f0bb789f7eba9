//! Per-connection session orchestration.
//!
//! A `SessionOrchestrator` owns one dialogue: its history, persona, mode
//! flags and mood. The connection's control loop calls it with `&mut self`;
//! each reply is produced by a spawned generation task, and at most one
//! such task is live at a time.
//!
//! ```text
//! Idle --submit_text/retry/continue_reply--> Generating
//! Generating --reply committed--> Idle   (utterance)
//! Generating --cancel-->          Idle   (canceled, no history change)
//! ```
//!
//! Cancellation is checked once more under the state lock right before
//! the assistant turn is appended, so a cancelled task never commits.

use companion_config::SessionConfig;
use companion_core::browse::SourceFetcher;
use companion_core::classify::EmotionClassifier;
use companion_core::error::{BrowseError, Error, GenerationError};
use companion_core::generator::{GenerationRequest, Generator};
use companion_core::message::{Citation, Role, Turn};
use companion_core::mood::MoodVector;
use companion_core::persona::Persona;
use companion_memory::MemoryHub;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assembler::{ContextAssembler, distill_cues, make_plan, user_turn_count};
use crate::classifier::LexiconClassifier;
use crate::event::{SessionEvent, Utterance};
use crate::filter::ContentFilter;
use crate::heuristics::{
    self, capitalize, cold_open_greeting, enforce_identity, is_filler, is_greeting,
    is_identity_question, is_origin_question, is_truncated, is_who_are_you, needs_browsing,
    one_word_toggle, strip_cold_open, to_one_word, truncate_chars, user_salience,
};
use crate::mood::{MESSAGE_DT, MoodSimulator};
use crate::voting::VotingGenerator;

/// Reply when the generation pipeline fails.
pub const THINKING_PLACEHOLDER: &str = "Let me think… try again in a second.";

/// Reply when a continuation fails.
pub const CONTINUE_PLACEHOLDER: &str = "Continuing…";

pub const ORIGIN_ANSWER: &str = "My parents, long story.";
pub const ORIGIN_ONE_WORD: &str = "Parents";

const ONE_WORD_FALLBACK: &str = "okay";

/// Turn count below which the early-interaction note is added.
const EARLY_INTERACTION_TURNS: usize = 6;

/// Page text characters per source handed to the backend.
const SOURCE_TEXT_CHARS: usize = 800;

const ONE_WORD_REQUEST_NOTE: &str = "User requested single-word replies. Respond with exactly one lowercase word unless safety requires otherwise.";
const ONE_WORD_ACTIVE_NOTE: &str = "One-word mode active. Return exactly one word.";
const EARLY_INTERACTION_NOTE: &str = "Early interaction: no pet names, no flirting, no sexual content. Treat user as a stranger; keep boundaries. Natural, brief.";
const CONTINUE_NOTE: &str = "Continue your last assistant message smoothly without repeating earlier text. 1–2 sentences.";
const BROWSE_INSTRUCTION: &str = "You may cite sources. Given the user query and sources, write a concise answer (1-2 sentences). Include bracketed citations like [1], [2] referencing the numbered sources.";

const GREETING_SALIENCE: f32 = 0.15;
const CONTINUE_SALIENCE: f32 = 0.15;
const ORIGIN_SALIENCE: f32 = 0.1;

/// Shared collaborators a session draws on.
#[derive(Clone)]
pub struct SessionDeps {
    pub memory: MemoryHub,
    pub browser: Option<Arc<dyn SourceFetcher>>,
    pub classifier: Arc<dyn EmotionClassifier>,
    pub assembler: ContextAssembler,
    /// Sources gathered per augmented answer.
    pub browse_results: usize,
}

impl SessionDeps {
    pub fn new(memory: MemoryHub) -> Self {
        Self {
            memory,
            browser: None,
            classifier: Arc::new(LexiconClassifier),
            assembler: ContextAssembler::default(),
            browse_results: 3,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn SourceFetcher>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn EmotionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }
}

/// Mode flags a generation snapshots when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeFlags {
    pub consistency_n: usize,
    pub auto_browsing: bool,
}

impl From<&SessionConfig> for ModeFlags {
    fn from(config: &SessionConfig) -> Self {
        Self {
            consistency_n: config.consistency_n,
            auto_browsing: config.auto_browsing,
        }
    }
}

/// What happened to a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    /// A generation is already running; the request was dropped.
    Busy,
    /// Nothing to generate from.
    Ignored,
}

#[derive(Debug)]
struct SessionState {
    history: Vec<Turn>,
    persona: &'static Persona,
    one_word: bool,
    identity_prefix: bool,
    last_user_text: Option<String>,
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct TaskHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct SessionOrchestrator {
    state: Arc<Mutex<SessionState>>,
    deps: SessionDeps,
    filter: Arc<ContentFilter>,
    generator: Arc<dyn Generator>,
    mood: MoodSimulator,
    defaults: SessionConfig,
    fast: bool,
    events: mpsc::Sender<SessionEvent>,
    generation: Option<TaskHandle>,
    ticker: Option<TaskHandle>,
}

impl SessionOrchestrator {
    pub fn new(
        deps: SessionDeps,
        generator: Arc<dyn Generator>,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let persona = Persona::get_or_default(&config.default_persona);
        let mood = MoodSimulator::new(deps.classifier.clone());
        Self {
            state: Arc::new(Mutex::new(SessionState {
                history: Vec::new(),
                persona,
                one_word: false,
                identity_prefix: false,
                last_user_text: None,
            })),
            deps,
            filter: Arc::new(ContentFilter::new()),
            generator,
            mood,
            defaults: config,
            fast: false,
            events,
            generation: None,
            ticker: None,
        }
    }

    /// Start pushing periodic mood states. Idempotent.
    pub fn start_mood_ticker(&mut self) {
        if self.ticker.as_ref().is_some_and(TaskHandle::is_live) {
            return;
        }
        let cancel = CancellationToken::new();
        let tick = Duration::from_millis(self.defaults.mood_tick_ms.max(1));
        let handle = self.mood.spawn_ticker(tick, self.events.clone(), cancel.clone());
        self.ticker = Some(TaskHandle { cancel, handle });
    }

    pub fn is_generating(&self) -> bool {
        self.generation.as_ref().is_some_and(TaskHandle::is_live)
    }

    /// Append a user turn and start replying to it.
    pub async fn submit_text(&mut self, text: &str, force_browse: bool) -> Dispatch {
        let text = text.trim();
        if text.is_empty() {
            return Dispatch::Ignored;
        }
        if self.is_generating() {
            debug!("Generation in flight, dropping message");
            return Dispatch::Busy;
        }

        {
            let mut state = lock(&self.state);
            let lower = text.to_lowercase();
            if is_identity_question(&lower) {
                state.identity_prefix = true;
            }
            if let Some(on) = one_word_toggle(&lower) {
                state.one_word = on;
            }
            state.history.push(Turn::user(text));
            state.last_user_text = Some(text.to_string());
        }
        self.deps
            .memory
            .remember(Turn::user(text), user_salience(text))
            .await;

        self.spawn_turn(TurnKind::Reply {
            user_text: text.to_string(),
            force_browse,
        })
        .await;
        Dispatch::Started
    }

    /// Re-run the last user text without appending it again.
    pub async fn retry(&mut self) -> Dispatch {
        if self.is_generating() {
            return Dispatch::Busy;
        }
        let Some(user_text) = lock(&self.state).last_user_text.clone() else {
            return Dispatch::Ignored;
        };
        self.spawn_turn(TurnKind::Reply {
            user_text,
            force_browse: false,
        })
        .await;
        Dispatch::Started
    }

    /// Extend the last assistant reply.
    pub async fn continue_reply(&mut self) -> Dispatch {
        if self.is_generating() {
            return Dispatch::Busy;
        }
        self.spawn_turn(TurnKind::Continue).await;
        Dispatch::Started
    }

    /// Signal the live generation to stop. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match &self.generation {
            Some(task) if task.is_live() => {
                task.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Switch persona; unknown keys leave the session unchanged.
    pub fn set_persona(&mut self, key: &str) -> bool {
        match Persona::find(key) {
            Some(persona) => {
                lock(&self.state).persona = persona;
                info!(persona = key, "Persona switched");
                true
            }
            None => {
                warn!(persona = key, "Unknown persona, keeping current");
                false
            }
        }
    }

    pub fn set_mode(&mut self, fast: bool) -> ModeFlags {
        self.fast = fast;
        let flags = self.mode();
        info!(fast, consistency_n = flags.consistency_n, auto_browsing = flags.auto_browsing, "Mode set");
        flags
    }

    pub fn mode(&self) -> ModeFlags {
        if self.fast {
            ModeFlags::from(&self.defaults.fast())
        } else {
            ModeFlags::from(&self.defaults)
        }
    }

    /// Replace the backend. A generation already running keeps the old one.
    pub fn set_generator(&mut self, generator: Arc<dyn Generator>) {
        info!(backend = generator.name(), "Backend switched");
        self.generator = generator;
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Clear short-term, long-term and chip memory. Dialogue history stays.
    pub async fn reset_memory(&self) {
        self.deps.memory.reset().await;
    }

    pub async fn mood(&self) -> MoodVector {
        self.mood.snapshot().await
    }

    pub fn history(&self) -> Vec<Turn> {
        lock(&self.state).history.clone()
    }

    pub fn persona(&self) -> &'static Persona {
        lock(&self.state).persona
    }

    pub fn one_word(&self) -> bool {
        lock(&self.state).one_word
    }

    /// Stop the mood ticker and the live generation, and wait for both.
    pub async fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel.cancel();
            if let Err(e) = ticker.handle.await {
                warn!(error = %e, "Mood ticker ended abnormally");
            }
        }
        if let Some(task) = self.generation.take() {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Generation task ended abnormally");
            }
        }
    }

    async fn spawn_turn(&mut self, kind: TurnKind) {
        let snapshot = {
            let state = lock(&self.state);
            TurnSnapshot {
                history: state.history.clone(),
                persona: state.persona,
                one_word: state.one_word,
                identity_prefix: state.identity_prefix,
                flags: self.mode(),
            }
        };

        // Sent before spawning so it always precedes the task's own events.
        if self.events.send(SessionEvent::Processing { on: true }).await.is_err() {
            debug!("Event receiver closed");
        }

        let runner = TurnRunner {
            deps: self.deps.clone(),
            filter: self.filter.clone(),
            generator: self.generator.clone(),
            mood: self.mood.clone(),
            events: self.events.clone(),
            state: self.state.clone(),
            snapshot,
        };
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { runner.run(kind, token).await });
        self.generation = Some(TaskHandle { cancel, handle });
    }
}

impl Drop for SessionOrchestrator {
    fn drop(&mut self) {
        for task in [&self.generation, &self.ticker].into_iter().flatten() {
            task.cancel.cancel();
        }
    }
}

enum TurnKind {
    Reply { user_text: String, force_browse: bool },
    Continue,
}

/// Session state as of the moment a generation started.
struct TurnSnapshot {
    history: Vec<Turn>,
    persona: &'static Persona,
    one_word: bool,
    identity_prefix: bool,
    flags: ModeFlags,
}

impl TurnSnapshot {
    fn last_user(&self) -> &str {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
            .unwrap_or("")
    }
}

/// A reply produced by the pipeline but not yet committed.
struct Reply {
    text: String,
    salience: f32,
    citations: Vec<Citation>,
    /// Whether the reply becomes an assistant turn.
    record: bool,
    consumed_identity_prefix: bool,
}

impl Reply {
    fn recorded(text: impl Into<String>, salience: f32) -> Self {
        Self {
            text: text.into(),
            salience,
            citations: Vec::new(),
            record: true,
            consumed_identity_prefix: false,
        }
    }

    fn unrecorded(text: impl Into<String>) -> Self {
        Self {
            record: false,
            ..Self::recorded(text, 0.0)
        }
    }
}

/// Everything one generation task needs, moved into the task.
struct TurnRunner {
    deps: SessionDeps,
    filter: Arc<ContentFilter>,
    generator: Arc<dyn Generator>,
    mood: MoodSimulator,
    events: mpsc::Sender<SessionEvent>,
    state: Arc<Mutex<SessionState>>,
    snapshot: TurnSnapshot,
}

impl TurnRunner {
    async fn run(self, kind: TurnKind, cancel: CancellationToken) {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            reply = self.produce(&kind) => Some(reply),
        };

        match outcome {
            Some(reply) => self.commit(reply, &cancel).await,
            None => self.acknowledge_cancel().await,
        }
        self.emit(SessionEvent::Processing { on: false }).await;
    }

    async fn emit(&self, event: SessionEvent) {
        let kind = event.event_type();
        if self.events.send(event).await.is_err() {
            debug!(event = kind, "Event receiver closed");
        }
    }

    async fn acknowledge_cancel(&self) {
        info!("Generation canceled");
        self.emit(SessionEvent::Canceled).await;
    }

    async fn produce(&self, kind: &TurnKind) -> Reply {
        match kind {
            TurnKind::Reply {
                user_text,
                force_browse,
            } => {
                if self.filter.is_illegal_intent(user_text) {
                    info!(persona = self.snapshot.persona.key, "Refusing illegal request");
                    return Reply::unrecorded(self.filter.persona_refusal(self.snapshot.persona));
                }

                let mood = self.mood.apply_text(user_text, MESSAGE_DT).await;
                self.emit(SessionEvent::Mood { mood }).await;

                match self.respond(*force_browse).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(error = %e, "Reply generation failed");
                        Reply::unrecorded(THINKING_PLACEHOLDER)
                    }
                }
            }
            TurnKind::Continue => match self.respond_continue().await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "Continuation failed");
                    Reply::unrecorded(CONTINUE_PLACEHOLDER)
                }
            },
        }
    }

    async fn respond(&self, force_browse: bool) -> Result<Reply, GenerationError> {
        let snap = &self.snapshot;
        let persona = snap.persona;
        let last_user = snap.last_user();
        let lower = last_user.to_lowercase();

        if snap.one_word && is_who_are_you(&lower) {
            return Ok(Reply::recorded(capitalize(persona.name), heuristics::ORDINARY));
        }
        if is_origin_question(&lower) {
            let answer = if snap.one_word { ORIGIN_ONE_WORD } else { ORIGIN_ANSWER };
            return Ok(Reply::recorded(answer, ORIGIN_SALIENCE));
        }

        let turn_count = user_turn_count(&snap.history);
        if turn_count <= 1 && is_greeting(&lower) {
            return Ok(Reply::recorded(cold_open_greeting(persona.name), GREETING_SALIENCE));
        }

        let assembler = &self.deps.assembler;
        let recall = assembler.recall(&self.deps.memory, &snap.history, last_user).await;
        let cues = distill_cues(&recall, last_user);
        let plan = make_plan(last_user, &cues, turn_count);

        let mut notes = Vec::new();
        if snap.one_word {
            notes.push(ONE_WORD_REQUEST_NOTE.to_string());
            notes.push(ONE_WORD_ACTIVE_NOTE.to_string());
        }
        if turn_count < EARLY_INTERACTION_TURNS {
            notes.push(EARLY_INTERACTION_NOTE.to_string());
        }
        let context = assembler.assemble(&recall, &snap.history, &notes, &plan);
        let mood = self.mood.snapshot().await;

        let browse = force_browse || (snap.flags.auto_browsing && needs_browsing(last_user));
        let answer = if browse {
            match self.browse_answer(last_user, mood).await {
                Ok(answer) => Some(answer),
                Err(Error::Browse(BrowseError::Disabled)) => None,
                Err(e) => {
                    warn!(error = %e, "Augmented answer failed, using plain reply");
                    None
                }
            }
        } else {
            None
        };

        let (raw, citations) = match answer {
            Some(answer) => answer,
            None => {
                let request = GenerationRequest::new(context)
                    .with_mood(mood)
                    .with_persona(persona.prompt, persona.ban_pattern);
                let voter = VotingGenerator::new(
                    self.generator.clone(),
                    self.filter.clone(),
                    snap.flags.consistency_n,
                );
                (voter.generate(request).await?, Vec::new())
            }
        };

        Ok(Reply {
            text: self.post_process(&raw, turn_count),
            salience: heuristics::ORDINARY,
            citations,
            record: true,
            consumed_identity_prefix: snap.identity_prefix,
        })
    }

    /// Search, then ask the backend for a short answer citing the sources.
    async fn browse_answer(&self, query: &str, mood: MoodVector) -> Result<(String, Vec<Citation>), Error> {
        let browser = self.deps.browser.as_ref().ok_or(BrowseError::Disabled)?;
        let sources = browser.gather_sources(query, self.deps.browse_results).await?;
        if sources.is_empty() {
            return Err(BrowseError::Search("no results".into()).into());
        }

        let numbered = sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "[{}]\nTitle: {}\nURL: {}\nSnippet: {}\nText: {}",
                    i + 1,
                    s.title,
                    s.url,
                    s.snippet,
                    truncate_chars(&s.text, SOURCE_TEXT_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = GenerationRequest::new(vec![
            Turn::system(BROWSE_INSTRUCTION),
            Turn::user(format!("Query: {query}\n\n{numbered}")),
        ])
        .with_mood(mood);
        let raw = self.generator.generate(request).await?;
        let text = self.filter.filter_text(&raw, self.snapshot.persona.ban_pattern);

        let citations = sources
            .into_iter()
            .enumerate()
            .map(|(i, s)| Citation {
                index: i + 1,
                title: s.title,
                url: s.url,
            })
            .collect();
        debug!(query, "Augmented answer ready");
        Ok((text, citations))
    }

    fn post_process(&self, text: &str, turn_count: usize) -> String {
        let snap = &self.snapshot;
        let persona = snap.persona;

        let mut text = self.filter.clamp_early_intimacy(text, turn_count);
        if snap.identity_prefix {
            text = format!("{} {}", persona.identity, text).trim().to_string();
        }

        if snap.one_word {
            let word = to_one_word(&text, ONE_WORD_FALLBACK);
            return if word.eq_ignore_ascii_case(persona.name) {
                persona.name.to_string()
            } else {
                word
            };
        }

        text = enforce_identity(&text, persona.name);
        if is_filler(&text) {
            text = cold_open_greeting(persona.name);
        }
        if turn_count > 1 {
            text = strip_cold_open(&text).trim().to_string();
            if text.is_empty() {
                text = "Okay.".to_string();
            }
        }
        text
    }

    async fn respond_continue(&self) -> Result<Reply, GenerationError> {
        let snap = &self.snapshot;
        let persona = snap.persona;
        let last_user = snap.last_user();
        let turn_count = user_turn_count(&snap.history);

        let assembler = &self.deps.assembler;
        let recall = assembler.recall(&self.deps.memory, &snap.history, last_user).await;
        let cues = distill_cues(&recall, last_user);
        let plan = make_plan(last_user, &cues, turn_count);

        let mut notes = vec![CONTINUE_NOTE.to_string()];
        if snap.one_word {
            notes.push(ONE_WORD_REQUEST_NOTE.to_string());
        }
        let context = assembler.assemble(&recall, &snap.history, &notes, &plan);

        let request = GenerationRequest::new(context)
            .with_mood(self.mood.snapshot().await)
            .with_persona(persona.prompt, persona.ban_pattern);
        let raw = VotingGenerator::new(self.generator.clone(), self.filter.clone(), 1)
            .generate(request)
            .await?;

        let text = if snap.one_word {
            to_one_word(&raw, ONE_WORD_FALLBACK)
        } else {
            enforce_identity(&raw, persona.name)
        };
        Ok(Reply::recorded(text, CONTINUE_SALIENCE))
    }

    async fn commit(&self, reply: Reply, cancel: &CancellationToken) {
        let turn_count = user_turn_count(&self.snapshot.history);
        let text = self.filter.enforce_boundaries(&reply.text, turn_count);

        let committed = {
            let mut state = lock(&self.state);
            if cancel.is_cancelled() {
                false
            } else {
                if reply.record {
                    state.history.push(Turn::assistant(text.clone()));
                }
                if reply.consumed_identity_prefix {
                    state.identity_prefix = false;
                }
                true
            }
        };
        if !committed {
            self.acknowledge_cancel().await;
            return;
        }

        if reply.record {
            self.deps
                .memory
                .remember(Turn::assistant(text.clone()), reply.salience)
                .await;
        }

        let emotion = self.mood.apply_text(&text, MESSAGE_DT).await;
        self.emit(SessionEvent::Mood { mood: emotion }).await;

        let utterance = Utterance {
            id: format!("u_{}", Uuid::new_v4().simple()),
            truncated: is_truncated(&text),
            text,
            emotion,
            citations: reply.citations,
        };
        debug!(id = %utterance.id, words = utterance.text.split_whitespace().count(), "Utterance ready");
        self.emit(SessionEvent::Utterance(utterance)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{INTIMACY_DEFLECTION, RefusalStyle};
    use crate::test_helpers::{FailingGenerator, ScriptedGenerator, SlowGenerator};
    use async_trait::async_trait;
    use companion_core::browse::Source;
    use companion_memory::{ChipStore, HashingEmbedder, RecentTurns, SemanticMemory};
    use tempfile::TempDir;

    struct Harness {
        session: SessionOrchestrator,
        events: mpsc::Receiver<SessionEvent>,
        _dir: TempDir,
    }

    fn memory(dir: &TempDir) -> MemoryHub {
        MemoryHub::new(
            Arc::new(RecentTurns::new(50)),
            Arc::new(SemanticMemory::new(Arc::new(HashingEmbedder::new(64)))),
            Arc::new(ChipStore::open(dir.path().join("chips.json"))),
            0.6,
        )
    }

    fn harness_with(generator: Arc<dyn Generator>, configure: impl FnOnce(SessionDeps) -> SessionDeps) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let deps = configure(SessionDeps::new(memory(&dir)));
        let (tx, rx) = mpsc::channel(64);
        Harness {
            session: SessionOrchestrator::new(deps, generator, SessionConfig::default(), tx),
            events: rx,
            _dir: dir,
        }
    }

    fn harness(generator: Arc<dyn Generator>) -> Harness {
        harness_with(generator, |deps| deps)
    }

    /// Collect events up to and including `processing{on:false}`.
    async fn finish_turn(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(event) = events.recv().await {
            let done = event == SessionEvent::Processing { on: false };
            out.push(event);
            if done {
                break;
            }
        }
        out
    }

    fn utterance(events: &[SessionEvent]) -> Option<&Utterance> {
        events.iter().find_map(|e| match e {
            SessionEvent::Utterance(u) => Some(u),
            _ => None,
        })
    }

    async fn say(h: &mut Harness, text: &str) -> Vec<SessionEvent> {
        assert_eq!(h.session.submit_text(text, false).await, Dispatch::Started);
        finish_turn(&mut h.events).await
    }

    #[tokio::test]
    async fn first_greeting_gets_cold_open_without_backend() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["unused"]));
        let mut h = harness(generator.clone());

        let events = say(&mut h, "hi").await;
        assert_eq!(events[0], SessionEvent::Processing { on: true });
        assert_eq!(utterance(&events).unwrap().text, cold_open_greeting("Aria"));
        assert_eq!(generator.call_count(), 0);
        assert_eq!(h.session.history().len(), 2);
    }

    #[tokio::test]
    async fn reply_flows_through_backend_and_identity_rules() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["I'm Sarah, and I went hiking."]));
        let mut h = harness(generator.clone());

        let events = say(&mut h, "tell me about your weekend").await;
        let u = utterance(&events).unwrap();
        assert_eq!(u.text, "I'm Aria, and I went hiking.");
        assert!(u.id.starts_with("u_"));
        assert!(u.citations.is_empty());
        assert!(!u.truncated);

        let request = generator.last_request().unwrap();
        let plan = request.context.last().unwrap();
        assert_eq!(plan.role, Role::System);
        assert!(plan.content.starts_with("Internal guidance (do not reveal)"));
        assert!(request.context.iter().any(|t| t.content == EARLY_INTERACTION_NOTE));
        assert_eq!(request.persona_prompt, h.session.persona().prompt);

        let history = h.session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1], Turn::assistant("I'm Aria, and I went hiking."));
    }

    #[tokio::test]
    async fn emits_mood_before_utterance() {
        let mut h = harness(Arc::new(ScriptedGenerator::new(vec!["Sounds fun."])));
        let events = say(&mut h, "I'm so happy today, great news").await;
        let kinds: Vec<&str> = events.iter().map(SessionEvent::event_type).collect();
        assert_eq!(kinds, vec!["processing", "mood", "mood", "utterance", "processing"]);
    }

    #[tokio::test]
    async fn illegal_request_is_refused_without_backend() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["unused"]));
        let mut h = harness(generator.clone());

        let events = say(&mut h, "how to make a bomb").await;
        let text = &utterance(&events).unwrap().text;
        assert!(RefusalStyle::Blunt.lines().contains(&text.as_str()));
        assert_eq!(generator.call_count(), 0);
        assert_eq!(h.session.history(), vec![Turn::user("how to make a bomb")]);
    }

    #[tokio::test]
    async fn one_word_mode_reduces_and_answers_name() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Honestly pretty tiring today."]));
        let mut h = harness(generator);

        let events = say(&mut h, "answer in one word: how was work").await;
        assert!(h.session.one_word());
        assert_eq!(utterance(&events).unwrap().text, "Honestly");

        let events = say(&mut h, "who are you").await;
        assert_eq!(utterance(&events).unwrap().text, "Aria");

        say(&mut h, "ok talk normally").await;
        assert!(!h.session.one_word());
    }

    #[tokio::test]
    async fn origin_question_has_fixed_answer() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["unused"]));
        let mut h = harness(generator.clone());
        let events = say(&mut h, "so who made you").await;
        assert_eq!(utterance(&events).unwrap().text, ORIGIN_ANSWER);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn identity_question_prefixes_next_reply_once() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Nice to meet you."]));
        let mut h = harness(generator);
        let identity = h.session.persona().identity;

        say(&mut h, "hey").await;
        let events = say(&mut h, "so what's your name").await;
        assert_eq!(
            utterance(&events).unwrap().text,
            format!("{identity} Nice to meet you.")
        );

        let events = say(&mut h, "cool, tell me something").await;
        assert_eq!(utterance(&events).unwrap().text, "Nice to meet you.");
    }

    #[tokio::test]
    async fn early_intimacy_is_deflected() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Come over tonight?"]));
        let mut h = harness(generator);
        say(&mut h, "hello").await;
        let events = say(&mut h, "any plans tonight").await;
        assert_eq!(utterance(&events).unwrap().text, INTIMACY_DEFLECTION);
    }

    #[tokio::test]
    async fn filler_after_first_turn_becomes_okay() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Wait."]));
        let mut h = harness(generator);
        say(&mut h, "hello").await;
        let events = say(&mut h, "tell me something").await;
        assert_eq!(utterance(&events).unwrap().text, "Okay.");
    }

    #[tokio::test]
    async fn backend_failure_yields_placeholder() {
        let mut h = harness(Arc::new(FailingGenerator));
        let events = say(&mut h, "tell me something").await;
        assert_eq!(utterance(&events).unwrap().text, THINKING_PLACEHOLDER);
        assert_eq!(h.session.history().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_reply() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_secs(10), "too late"));
        let mut h = harness(generator);

        assert_eq!(
            h.session.submit_text("tell me a story", false).await,
            Dispatch::Started
        );
        assert_eq!(h.events.recv().await, Some(SessionEvent::Processing { on: true }));
        assert!(matches!(h.events.recv().await, Some(SessionEvent::Mood { .. })));
        assert!(h.session.cancel());

        let events = finish_turn(&mut h.events).await;
        assert_eq!(
            events,
            vec![SessionEvent::Canceled, SessionEvent::Processing { on: false }]
        );
        assert_eq!(h.session.history(), vec![Turn::user("tell me a story")]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_session_drops_new_messages() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_secs(10), "done"));
        let mut h = harness(generator);

        assert_eq!(h.session.submit_text("first", false).await, Dispatch::Started);
        assert!(h.session.is_generating());
        assert_eq!(h.session.submit_text("second", false).await, Dispatch::Busy);
        assert_eq!(h.session.retry().await, Dispatch::Busy);
        assert_eq!(h.session.continue_reply().await, Dispatch::Busy);

        finish_turn(&mut h.events).await;
        let history = h.session.history();
        assert_eq!(history, vec![Turn::user("first"), Turn::assistant("done")]);
    }

    #[tokio::test]
    async fn cancel_when_idle_is_noop() {
        let mut h = harness(Arc::new(ScriptedGenerator::new(vec!["x"])));
        assert!(!h.session.cancel());
    }

    #[tokio::test]
    async fn retry_does_not_duplicate_user_turn() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["First take.", "Second take."]));
        let mut h = harness(generator);

        assert_eq!(h.session.retry().await, Dispatch::Ignored);
        say(&mut h, "tell me something").await;
        assert_eq!(h.session.retry().await, Dispatch::Started);
        finish_turn(&mut h.events).await;

        let history = h.session.history();
        assert_eq!(history.iter().filter(|t| t.role == Role::User).count(), 1);
        assert_eq!(history.last().unwrap(), &Turn::assistant("Second take."));
    }

    #[tokio::test]
    async fn continue_appends_assistant_turn() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["It was raining.", "Then it cleared up."]));
        let mut h = harness(generator.clone());

        say(&mut h, "tell me about your day").await;
        assert_eq!(h.session.continue_reply().await, Dispatch::Started);
        let events = finish_turn(&mut h.events).await;
        assert_eq!(utterance(&events).unwrap().text, "Then it cleared up.");

        let request = generator.last_request().unwrap();
        assert!(request.context.iter().any(|t| t.content == CONTINUE_NOTE));
        assert_eq!(h.session.history().len(), 3);
    }

    #[tokio::test]
    async fn empty_text_is_ignored() {
        let mut h = harness(Arc::new(ScriptedGenerator::new(vec!["x"])));
        assert_eq!(h.session.submit_text("   ", false).await, Dispatch::Ignored);
        assert!(h.session.history().is_empty());
    }

    struct StubBrowser;

    #[async_trait]
    impl SourceFetcher for StubBrowser {
        async fn gather_sources(&self, _query: &str, k: usize) -> Result<Vec<Source>, BrowseError> {
            Ok((1..=2.min(k))
                .map(|i| Source {
                    title: format!("Source {i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: "snippet".into(),
                    text: "x".repeat(2000),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn forced_browse_attaches_citations() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["It shipped last week [1][2]."]));
        let mut h = harness_with(generator.clone(), |deps| deps.with_browser(Arc::new(StubBrowser)));

        assert_eq!(
            h.session.submit_text("what happened with the launch", true).await,
            Dispatch::Started
        );
        let events = finish_turn(&mut h.events).await;
        let u = utterance(&events).unwrap();
        assert_eq!(u.text, "It shipped last week [1][2].");
        assert_eq!(
            u.citations.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(u.citations[1].url, "https://example.com/2");

        let request = generator.last_request().unwrap();
        assert_eq!(request.context[0], Turn::system(BROWSE_INSTRUCTION));
        let prompt = &request.context[1].content;
        assert!(prompt.starts_with("Query: what happened with the launch\n\n[1]\nTitle: Source 1"));
        assert!(!prompt.contains(&"x".repeat(SOURCE_TEXT_CHARS + 1)));
    }

    /// Three search hits where only the first page fetch produced text.
    struct PartialFetchBrowser;

    #[async_trait]
    impl SourceFetcher for PartialFetchBrowser {
        async fn gather_sources(&self, _query: &str, _k: usize) -> Result<Vec<Source>, BrowseError> {
            Ok((1..=3)
                .map(|i| Source {
                    title: format!("Source {i}"),
                    url: format!("https://example.com/{i}"),
                    snippet: format!("snippet {i}"),
                    text: if i == 1 { "page body".into() } else { String::new() },
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn citations_stay_dense_when_page_fetches_fail() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["It rained [1][3]."]));
        let mut h = harness_with(generator.clone(), |deps| {
            deps.with_browser(Arc::new(PartialFetchBrowser))
        });

        h.session.submit_text("weather in paris", true).await;
        let events = finish_turn(&mut h.events).await;
        let u = utterance(&events).unwrap();
        assert_eq!(
            u.citations.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(u.citations[2].url, "https://example.com/3");

        let prompt = &generator.last_request().unwrap().context[1].content;
        for i in 1..=3 {
            assert!(prompt.contains(&format!("[{i}]\nTitle: Source {i}")));
        }
        assert!(prompt.contains("Snippet: snippet 2\nText: \n"));
    }

    #[tokio::test]
    async fn trigger_word_browses_only_when_enabled() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["Sure."]));
        let mut h = harness_with(generator, |deps| deps.with_browser(Arc::new(StubBrowser)));

        let events = say(&mut h, "any news about the festival").await;
        assert_eq!(utterance(&events).unwrap().citations.len(), 2);

        h.session.set_mode(true);
        let events = say(&mut h, "more news please").await;
        assert!(utterance(&events).unwrap().citations.is_empty());
    }

    #[tokio::test]
    async fn forced_browse_without_browser_falls_back() {
        let generator = Arc::new(ScriptedGenerator::new(vec!["No idea honestly."]));
        let mut h = harness(generator);
        h.session.submit_text("latest scores", true).await;
        let events = finish_turn(&mut h.events).await;
        let u = utterance(&events).unwrap();
        assert_eq!(u.text, "No idea honestly.");
        assert!(u.citations.is_empty());
    }

    #[tokio::test]
    async fn mode_and_persona_controls() {
        let mut h = harness(Arc::new(ScriptedGenerator::new(vec!["x"])));

        let fast = h.session.set_mode(true);
        assert_eq!(
            fast,
            ModeFlags {
                consistency_n: 1,
                auto_browsing: false
            }
        );
        let normal = h.session.set_mode(false);
        assert!(normal.auto_browsing);

        assert!(h.session.set_persona("girlfriend_nerdy"));
        assert_eq!(h.session.persona().key, "girlfriend_nerdy");
        assert!(!h.session.set_persona("nope"));
        assert_eq!(h.session.persona().key, "girlfriend_nerdy");
    }

    #[tokio::test]
    async fn set_generator_swaps_backend() {
        let mut h = harness(Arc::new(FailingGenerator));
        h.session.set_generator(Arc::new(ScriptedGenerator::new(vec!["Back online."])));
        assert_eq!(h.session.generator_name(), "scripted");
        let events = say(&mut h, "tell me something").await;
        assert_eq!(utterance(&events).unwrap().text, "Back online.");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_everything() {
        let generator = Arc::new(SlowGenerator::new(Duration::from_secs(30), "late"));
        let mut h = harness(generator);
        h.session.start_mood_ticker();
        h.session.submit_text("tell me a story", false).await;

        h.session.shutdown().await;
        assert!(!h.session.is_generating());
        assert_eq!(h.session.history().len(), 1);
    }
}
