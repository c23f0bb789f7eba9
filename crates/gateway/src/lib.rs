//! HTTP gateway for Companion.
//!
//! Serves the `/ws` conversation socket, a health check, and REST
//! endpoints for managing memory chips.
//!
//! Built on Axum.

pub mod protocol;
pub mod ws;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get},
};
use companion_agent::{ContextAssembler, SessionDeps};
use companion_config::AppConfig;
use companion_core::browse::SourceFetcher;
use companion_core::error::GenerationError;
use companion_core::generator::Generator;
use companion_core::memory::MemoryChip;
use companion_core::transcribe::Transcriber;
use companion_memory::MemoryHub;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Application-wide collaborators shared by every connection.
///
/// Memory is shared across sessions; dialogue history lives in each
/// connection's session.
pub struct GatewayState {
    pub config: AppConfig,
    pub memory: MemoryHub,
    pub generator: Arc<dyn Generator>,
    pub browser: Option<Arc<dyn SourceFetcher>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Build the backend, memory layers and browser from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, GenerationError> {
        let generator = companion_providers::build_from_config(&config)?;
        let memory = MemoryHub::from_config(&config.memory);

        let browser: Option<Arc<dyn SourceFetcher>> = if config.browse.enabled {
            match companion_tools::WebBrowser::new(&config.browse) {
                Ok(browser) => Some(Arc::new(browser)),
                Err(e) => {
                    warn!(error = %e, "Browsing unavailable");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            config,
            memory,
            generator,
            browser,
            transcriber: None,
        })
    }

    /// Collaborators for a new session.
    pub fn session_deps(&self) -> SessionDeps {
        let mut deps = SessionDeps::new(self.memory.clone())
            .with_assembler(ContextAssembler::from_config(&self.config.memory));
        deps.browse_results = self.config.browse.results;
        if let Some(browser) = &self.browser {
            deps = deps.with_browser(browser.clone());
        }
        deps
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws::ws_handler))
        .route(
            "/chips",
            get(list_chips_handler)
                .post(upsert_chip_handler)
                .delete(clear_chips_handler),
        )
        .route("/chips/{name}", delete(delete_chip_handler))
        .layer(CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(GatewayState::from_config(config)?);
    info!(
        backend = state.generator.name(),
        browsing = state.browser.is_some(),
        chips = %state.memory.chips.path().display(),
        "Gateway state ready"
    );

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize, Deserialize)]
struct ChipListResponse {
    chips: Vec<MemoryChip>,
    count: usize,
}

#[derive(Deserialize)]
struct UpsertChipRequest {
    name: String,
    content: String,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ChipResponse {
    success: bool,
    message: String,
}

type ChipError = (StatusCode, Json<ChipResponse>);

fn chip_error(status: StatusCode, message: String) -> ChipError {
    (
        status,
        Json(ChipResponse {
            success: false,
            message,
        }),
    )
}

async fn list_chips_handler(State(state): State<SharedState>) -> Json<ChipListResponse> {
    let chips = state.memory.chips.list().await;
    let count = chips.len();
    Json(ChipListResponse { chips, count })
}

/// `POST /chips`: insert, or replace the chip with the same name.
async fn upsert_chip_handler(
    State(state): State<SharedState>,
    Json(req): Json<UpsertChipRequest>,
) -> Result<(StatusCode, Json<MemoryChip>), ChipError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(chip_error(
            StatusCode::BAD_REQUEST,
            "chip name must not be empty".into(),
        ));
    }

    let chip = MemoryChip::new(name, req.content, req.keywords);
    state
        .memory
        .chips
        .add(chip.clone())
        .await
        .map_err(|e| chip_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    info!(name = %chip.name, keywords = chip.keywords.len(), "Memory chip saved");
    Ok((StatusCode::CREATED, Json(chip)))
}

async fn delete_chip_handler(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<ChipResponse>, ChipError> {
    match state.memory.chips.remove(&name).await {
        Ok(true) => Ok(Json(ChipResponse {
            success: true,
            message: format!("Chip '{name}' deleted"),
        })),
        Ok(false) => Err(chip_error(
            StatusCode::NOT_FOUND,
            format!("Chip '{name}' not found"),
        )),
        Err(e) => Err(chip_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn clear_chips_handler(
    State(state): State<SharedState>,
) -> Result<Json<ChipResponse>, ChipError> {
    state
        .memory
        .chips
        .clear()
        .await
        .map_err(|e| chip_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(ChipResponse {
        success: true,
        message: "All chips cleared".into(),
    }))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use companion_core::generator::GenerationRequest;
    use companion_core::transcribe::TranscriptCallback;
    use companion_memory::{ChipStore, HashingEmbedder, RecentTurns, SemanticMemory};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    pub struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, _request: GenerationRequest) -> Result<String, GenerationError> {
            Ok("That sounds like a good time.".into())
        }
    }

    #[derive(Default)]
    pub struct StubTranscriber {
        audio: Mutex<Vec<u8>>,
        on_partial: Mutex<Option<TranscriptCallback>>,
        stopped: AtomicBool,
    }

    impl StubTranscriber {
        pub fn pushed(&self) -> Vec<u8> {
            self.audio.lock().unwrap().clone()
        }

        pub fn emit_partial(&self, text: &str) {
            let callback = self.on_partial.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(text.to_string());
            }
        }

        pub fn stopped(&self) -> bool {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn start(&self, on_partial: TranscriptCallback, _on_final: TranscriptCallback) {
            *self.on_partial.lock().unwrap() = Some(on_partial);
        }

        fn push_audio(&self, pcm: &[u8]) {
            self.audio.lock().unwrap().extend_from_slice(pcm);
        }

        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    pub fn test_state_with(configure: impl FnOnce(&mut GatewayState)) -> (SharedState, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.session.mood_tick_ms = 60_000;

        let mut state = GatewayState {
            config,
            memory: MemoryHub::new(
                Arc::new(RecentTurns::new(50)),
                Arc::new(SemanticMemory::new(Arc::new(HashingEmbedder::new(64)))),
                Arc::new(ChipStore::open(dir.path().join("chips.json"))),
                0.6,
            ),
            generator: Arc::new(EchoGenerator),
            browser: None,
            transcriber: None,
        };
        configure(&mut state);
        (Arc::new(state), dir)
    }

    pub fn test_state() -> (SharedState, TempDir) {
        test_state_with(|_| {})
    }
}
