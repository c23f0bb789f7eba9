//! `GET /ws`: one conversation per socket.
//!
//! The socket is split: a writer task drains outbound frames, a forwarder
//! task turns session events into frames, and the control loop here reads
//! client frames and drives the `SessionOrchestrator`.

use axum::{
    extract::State,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use companion_agent::{Dispatch, SessionEvent, SessionOrchestrator};
use companion_config::BackendKind;
use companion_core::persona::Persona;
use companion_core::transcribe::TranscriptCallback;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SharedState;
use crate::protocol::{ClientEvent, ServerFrame, SttInfo, frames_for, parse_binary_frame, parse_client_event};

/// Frames queued for the socket writer.
const OUTBOUND_BUFFER: usize = 64;

/// Session events queued for the forwarder.
const EVENT_BUFFER: usize = 64;

const AUDIO_CHUNK: &str = "audio_chunk";

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: SharedState) {
    info!("WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(WsMessage::Text(frame.to_json().into())).await.is_err() {
                debug!("Socket closed while sending");
                break;
            }
        }
    });

    let mut conn = Connection::open(state, out_tx).await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => conn.handle_text(text.as_str()).await,
            Ok(WsMessage::Binary(data)) => conn.handle_binary(&data),
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        }
    }

    conn.close().await;
    if let Err(e) = writer.await {
        warn!(error = %e, "Socket writer ended abnormally");
    }
    info!("WebSocket connection closed");
}

/// Per-socket state: the session plus the task forwarding its events.
pub struct Connection {
    session: SessionOrchestrator,
    state: SharedState,
    out: mpsc::Sender<ServerFrame>,
    forwarder: JoinHandle<()>,
}

impl Connection {
    /// Send the greeting frames and start the mood ticker and transcriber.
    pub async fn open(state: SharedState, out: mpsc::Sender<ServerFrame>) -> Self {
        let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(EVENT_BUFFER);
        let mut session = SessionOrchestrator::new(
            state.session_deps(),
            state.generator.clone(),
            state.config.session.clone(),
            events_tx,
        );

        let stt_enabled = state.transcriber.is_some();
        send(
            &out,
            ServerFrame::ServerInfo {
                version: env!("CARGO_PKG_VERSION"),
                stt: SttInfo {
                    ok: stt_enabled,
                    device: if stt_enabled { "auto" } else { "none" }.to_string(),
                    enabled: stt_enabled,
                },
            },
        )
        .await;
        send(
            &out,
            ServerFrame::Personas {
                options: Persona::keys(),
            },
        )
        .await;
        send(
            &out,
            ServerFrame::StateUpdate {
                mood: session.mood().await,
            },
        )
        .await;

        let forward_out = out.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                for frame in frames_for(event) {
                    if forward_out.send(frame).await.is_err() {
                        return;
                    }
                }
            }
        });

        session.start_mood_ticker();

        if let Some(transcriber) = &state.transcriber {
            let partial_out = out.downgrade();
            let on_partial: TranscriptCallback = Arc::new(move |text: String| {
                if let Some(tx) = partial_out.upgrade() {
                    if tx.try_send(ServerFrame::PartialTranscript { text }).is_err() {
                        debug!("Dropped partial transcript");
                    }
                }
            });
            let on_final: TranscriptCallback = Arc::new(|text: String| {
                debug!(chars = text.len(), "Final transcript");
            });
            transcriber.start(on_partial, on_final).await;
        }

        Self {
            session,
            state,
            out,
            forwarder,
        }
    }

    /// Handle one text frame. Protocol errors are answered, never fatal.
    pub async fn handle_text(&mut self, text: &str) {
        match parse_client_event(text) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                debug!(error = %e, "Rejected client frame");
                self.send(ServerFrame::error(e.to_string())).await;
            }
        }
    }

    /// Handle one binary frame. Anything but a well-formed audio chunk
    /// with a running transcriber is dropped.
    pub fn handle_binary(&self, data: &[u8]) {
        let Some(transcriber) = &self.state.transcriber else {
            return;
        };
        match parse_binary_frame(data) {
            Ok((header, pcm)) if header.kind == AUDIO_CHUNK => transcriber.push_audio(pcm),
            Ok((header, _)) => debug!(kind = %header.kind, "Ignoring binary frame"),
            Err(e) => debug!(error = %e, "Malformed binary frame"),
        }
    }

    pub async fn dispatch(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Ping => self.send(ServerFrame::pong()).await,
            ClientEvent::TextMessage { text, force_browse } => {
                let outcome = self.session.submit_text(&text, force_browse).await;
                if outcome == Dispatch::Busy {
                    debug!("Generation in progress, dropping text message");
                }
            }
            ClientEvent::Continue => {
                if self.session.continue_reply().await == Dispatch::Busy {
                    debug!("Generation in progress, dropping continue");
                }
            }
            ClientEvent::Retry => {
                if self.session.retry().await == Dispatch::Busy {
                    debug!("Generation in progress, dropping retry");
                }
            }
            ClientEvent::Cancel => {
                self.session.cancel();
            }
            ClientEvent::SetPersona { key } => {
                self.session.set_persona(&key);
                self.send(ServerFrame::PersonaSet { key }).await;
            }
            ClientEvent::SetModel { which } => {
                let which = which.to_lowercase();
                let kind = BackendKind::from_which(&which);
                match companion_providers::build_generator(kind, &self.state.config.backend) {
                    Ok(generator) => {
                        self.session.set_generator(generator);
                        self.send(ServerFrame::ModelSet { which }).await;
                    }
                    Err(e) => {
                        warn!(which = %which, error = %e, "Backend switch failed, keeping current");
                        self.send(ServerFrame::error(format!("model unavailable: {e}")))
                            .await;
                    }
                }
            }
            ClientEvent::SetMode { fast } => {
                let flags = self.session.set_mode(fast);
                self.send(ServerFrame::mode_set(flags)).await;
            }
            ClientEvent::ResetMemory => {
                self.session.reset_memory().await;
                self.send(ServerFrame::MemoryReset { ok: true }).await;
            }
        }
    }

    pub fn session(&self) -> &SessionOrchestrator {
        &self.session
    }

    /// Stop background work and wait until every queued event is
    /// forwarded.
    pub async fn close(self) {
        let Self {
            mut session,
            state,
            forwarder,
            ..
        } = self;

        session.shutdown().await;
        if let Some(transcriber) = &state.transcriber {
            transcriber.stop().await;
        }
        drop(session);

        if let Err(e) = forwarder.await {
            warn!(error = %e, "Event forwarder ended abnormally");
        }
    }

    async fn send(&self, frame: ServerFrame) {
        send(&self.out, frame).await;
    }
}

async fn send(out: &mpsc::Sender<ServerFrame>, frame: ServerFrame) {
    if out.send(frame).await.is_err() {
        debug!("Outbound channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayState;
    use crate::test_support::{EchoGenerator, StubTranscriber, test_state, test_state_with};
    use companion_core::mood::MoodVector;
    use tempfile::TempDir;

    async fn open() -> (Connection, mpsc::Receiver<ServerFrame>, TempDir) {
        let (state, dir) = test_state();
        let (tx, rx) = mpsc::channel(64);
        (Connection::open(state, tx).await, rx, dir)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
        rx.recv().await.unwrap()
    }

    /// Frames up to and including `processing{on:false}`, skipping mood
    /// ticks.
    async fn until_idle(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            let done = frame == ServerFrame::Processing { on: false };
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    async fn skip_greeting(rx: &mut mpsc::Receiver<ServerFrame>) {
        for _ in 0..3 {
            next_frame(rx).await;
        }
    }

    #[tokio::test]
    async fn greeting_frames_in_order() {
        let (conn, mut rx, _dir) = open().await;

        match next_frame(&mut rx).await {
            ServerFrame::ServerInfo { version, stt } => {
                assert_eq!(version, env!("CARGO_PKG_VERSION"));
                assert!(!stt.ok);
                assert!(!stt.enabled);
            }
            other => panic!("expected server_info, got {other:?}"),
        }
        match next_frame(&mut rx).await {
            ServerFrame::Personas { options } => assert_eq!(options, Persona::keys()),
            other => panic!("expected personas, got {other:?}"),
        }
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::StateUpdate {
                mood: MoodVector::baseline()
            }
        );
        conn.close().await;
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;

        conn.handle_text(r#"{"type":"ping"}"#).await;
        assert!(matches!(next_frame(&mut rx).await, ServerFrame::Pong { t } if t > 0.0));
        conn.close().await;
    }

    #[tokio::test]
    async fn protocol_errors_are_answered() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;

        conn.handle_text("not json").await;
        assert_eq!(next_frame(&mut rx).await, ServerFrame::error("invalid json"));

        conn.handle_text(r#"{"type":"dance"}"#).await;
        assert_eq!(next_frame(&mut rx).await, ServerFrame::error("unknown type: dance"));
        conn.close().await;
    }

    #[tokio::test]
    async fn text_message_produces_utterance_pair() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;

        conn.handle_text(r#"{"type":"text_message","text":"tell me about your weekend"}"#)
            .await;
        let frames = until_idle(&mut rx).await;

        assert_eq!(frames[0], ServerFrame::Processing { on: true });
        let start = frames
            .iter()
            .position(|f| matches!(f, ServerFrame::UtteranceStart { .. }))
            .expect("utterance_start");
        let ServerFrame::UtteranceStart { id, text, .. } = &frames[start] else {
            unreachable!()
        };
        assert!(id.starts_with("u_"));
        assert!(!text.is_empty());
        assert_eq!(frames[start + 1], ServerFrame::UtteranceEnd { id: id.clone() });
        assert_eq!(conn.session().history().len(), 2);
        conn.close().await;
    }

    #[tokio::test]
    async fn mode_and_persona_are_echoed() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;

        conn.dispatch(ClientEvent::SetMode { fast: true }).await;
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::ModeSet {
                consistency_n: 1,
                auto_browsing: false
            }
        );

        conn.dispatch(ClientEvent::SetPersona {
            key: "girlfriend_nerdy".into(),
        })
        .await;
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::PersonaSet {
                key: "girlfriend_nerdy".into()
            }
        );
        assert_eq!(conn.session().persona().key, "girlfriend_nerdy");

        conn.dispatch(ClientEvent::SetPersona { key: "nobody".into() }).await;
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::PersonaSet { key: "nobody".into() }
        );
        assert_eq!(conn.session().persona().key, "girlfriend_nerdy");
        conn.close().await;
    }

    #[tokio::test]
    async fn set_model_switches_to_local() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;

        conn.dispatch(ClientEvent::SetModel { which: "LOCAL".into() }).await;
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::ModelSet { which: "local".into() }
        );
        assert_eq!(conn.session().generator_name(), "local");
        conn.close().await;
    }

    #[tokio::test]
    async fn reset_memory_clears_chips() {
        let (mut conn, mut rx, _dir) = open().await;
        skip_greeting(&mut rx).await;
        let chips = conn.state.memory.chips.clone();
        chips
            .add(companion_core::memory::MemoryChip::new("pet", "a cat", vec!["cat".into()]))
            .await
            .unwrap();

        conn.dispatch(ClientEvent::ResetMemory).await;
        assert_eq!(next_frame(&mut rx).await, ServerFrame::MemoryReset { ok: true });
        assert!(chips.list().await.is_empty());
        conn.close().await;
    }

    #[tokio::test]
    async fn audio_chunks_reach_transcriber() {
        let transcriber = Arc::new(StubTranscriber::default());
        let (state, _dir) = test_state_with(|state: &mut GatewayState| {
            state.transcriber = Some(transcriber.clone());
        });
        let (tx, mut rx) = mpsc::channel(64);
        let conn = Connection::open(state, tx).await;

        match next_frame(&mut rx).await {
            ServerFrame::ServerInfo { stt, .. } => assert!(stt.ok && stt.enabled),
            other => panic!("expected server_info, got {other:?}"),
        }
        skip_greeting_rest(&mut rx).await;

        let header = br#"{"type":"audio_chunk"}"#;
        let mut frame = (header.len() as u32).to_le_bytes().to_vec();
        frame.extend_from_slice(header);
        frame.extend_from_slice(&[7, 8]);
        conn.handle_binary(&frame);
        conn.handle_binary(&[0, 1]);
        assert_eq!(transcriber.pushed(), vec![7, 8]);

        transcriber.emit_partial("hel");
        assert_eq!(
            next_frame(&mut rx).await,
            ServerFrame::PartialTranscript { text: "hel".into() }
        );

        conn.close().await;
        assert!(transcriber.stopped());
    }

    async fn skip_greeting_rest(rx: &mut mpsc::Receiver<ServerFrame>) {
        for _ in 0..2 {
            next_frame(rx).await;
        }
    }

    #[tokio::test]
    async fn close_flushes_and_ends_forwarder() {
        let (state, _dir) = test_state_with(|state: &mut GatewayState| {
            state.generator = Arc::new(EchoGenerator);
        });
        let (tx, mut rx) = mpsc::channel(64);
        let mut conn = Connection::open(state, tx).await;
        skip_greeting(&mut rx).await;

        conn.handle_text(r#"{"type":"text_message","text":"what did you eat today"}"#)
            .await;
        conn.close().await;

        // The channel closes once every frame produced before close is queued.
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        assert_eq!(frames.first(), Some(&ServerFrame::Processing { on: true }));
        assert_eq!(frames.last(), Some(&ServerFrame::Processing { on: false }));
    }
}
