//! Configuration loading, validation, and management for Companion.
//!
//! Loads configuration from `~/.companion/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.companion/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Per-session defaults
    #[serde(default)]
    pub session: SessionConfig,

    /// Memory configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Browsing configuration
    #[serde(default)]
    pub browse: BrowseConfig,
}

fn default_true() -> bool {
    true
}

/// Which generation backend implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Hosted text-generation API
    #[default]
    Hosted,
    /// Local model server
    Local,
}

impl BackendKind {
    /// Parse a `set_model{which}` value. `"gemini"`/`"hosted"` select the
    /// hosted API; anything else selects the local model.
    pub fn from_which(which: &str) -> Self {
        match which.trim().to_lowercase().as_str() {
            "gemini" | "hosted" | "cloud" => BackendKind::Hosted,
            _ => BackendKind::Local,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Hosted => f.write_str("hosted"),
            BackendKind::Local => f.write_str("local"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// API key for the hosted backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_hosted_model")]
    pub hosted_model: String,

    #[serde(default = "default_hosted_url")]
    pub hosted_url: String,

    #[serde(default = "default_local_model")]
    pub local_model: String,

    #[serde(default = "default_local_url")]
    pub local_url: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Replies longer than this many words are trimmed
    #[serde(default = "default_soft_max_words")]
    pub soft_max_words: usize,

    /// Total attempts per generation call (1 = no retry)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Linear backoff step between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_hosted_model() -> String {
    "gemini-1.5-flash-latest".into()
}
fn default_hosted_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_local_model() -> String {
    "llama3.1:8b-instruct-q4_0".into()
}
fn default_local_url() -> String {
    "http://localhost:11434".into()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_top_p() -> f32 {
    0.85
}
fn default_max_output_tokens() -> u32 {
    200
}
fn default_soft_max_words() -> usize {
    300
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    350
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            api_key: None,
            hosted_model: default_hosted_model(),
            hosted_url: default_hosted_url(),
            local_model: default_local_model(),
            local_url: default_local_url(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_output_tokens: default_max_output_tokens(),
            soft_max_words: default_soft_max_words(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("api_key", &redact(&self.api_key))
            .field("hosted_model", &self.hosted_model)
            .field("hosted_url", &self.hosted_url)
            .field("local_model", &self.local_model)
            .field("local_url", &self.local_url)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("soft_max_words", &self.soft_max_words)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Explicit per-session defaults, passed at session construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Candidates per turn for self-consistency voting
    #[serde(default = "default_consistency_n")]
    pub consistency_n: usize,

    /// Whether trigger words may route a turn through browsing
    #[serde(default = "default_true")]
    pub auto_browsing: bool,

    #[serde(default = "default_persona")]
    pub default_persona: String,

    /// Mood simulator tick interval
    #[serde(default = "default_mood_tick_ms")]
    pub mood_tick_ms: u64,
}

fn default_consistency_n() -> usize {
    1
}
fn default_persona() -> String {
    "girlfriend_warm_blunt".into()
}
fn default_mood_tick_ms() -> u64 {
    1000
}

impl SessionConfig {
    /// The low-latency profile: a single candidate, no browsing.
    pub fn fast(&self) -> Self {
        Self {
            consistency_n: 1,
            auto_browsing: false,
            ..self.clone()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            consistency_n: default_consistency_n(),
            auto_browsing: true,
            default_persona: default_persona(),
            mood_tick_ms: default_mood_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Max turns kept in the short-term log
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,

    /// Recent turns pulled into each context
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Minimum salience for promotion into long-term memory
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: f32,

    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Memory chip file; defaults to `~/.companion/memory_chips.json`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chips_path: Option<PathBuf>,
}

fn default_short_term_capacity() -> usize {
    50
}
fn default_recent_window() -> usize {
    12
}
fn default_retrieval_top_k() -> usize {
    3
}
fn default_promotion_threshold() -> f32 {
    0.6
}
fn default_embedding_dimensions() -> usize {
    384
}

impl MemoryConfig {
    /// Resolved chip file path.
    pub fn chips_path(&self) -> PathBuf {
        self.chips_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memory_chips.json"))
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: default_short_term_capacity(),
            recent_window: default_recent_window(),
            retrieval_top_k: default_retrieval_top_k(),
            promotion_threshold: default_promotion_threshold(),
            embedding_dimensions: default_embedding_dimensions(),
            chips_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sources fetched per augmented answer
    #[serde(default = "default_browse_results")]
    pub results: usize,

    #[serde(default = "default_browse_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_browse_results() -> usize {
    3
}
fn default_browse_timeout_secs() -> u64 {
    12
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            results: default_browse_results(),
            timeout_secs: default_browse_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.companion/config.toml).
    ///
    /// Environment variables override the file:
    /// - `COMPANION_API_KEY` / `GEMINI_API_KEY`
    /// - `COMPANION_BACKEND` (`hosted` or `local`)
    /// - `COMPANION_MODEL`, `OLLAMA_URL`
    /// - `SELF_CONSISTENCY_N`, `AUTO_BROWSING`
    /// - `MEMORY_CHIPS_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.backend.api_key.is_none() {
            self.backend.api_key = env("COMPANION_API_KEY").or_else(|| env("GEMINI_API_KEY"));
        }

        if let Some(kind) = env("COMPANION_BACKEND") {
            self.backend.kind = BackendKind::from_which(&kind);
        }

        if let Some(model) = env("COMPANION_MODEL") {
            match self.backend.kind {
                BackendKind::Hosted => self.backend.hosted_model = model,
                BackendKind::Local => self.backend.local_model = model,
            }
        }

        if let Some(url) = env("OLLAMA_URL") {
            self.backend.local_url = url;
        }

        if let Some(n) = env("SELF_CONSISTENCY_N").and_then(|v| v.trim().parse().ok()) {
            self.session.consistency_n = n;
        }

        if let Some(flag) = env("AUTO_BROWSING") {
            self.session.auto_browsing = flag.trim() != "0";
        }

        if let Some(path) = env("MEMORY_CHIPS_PATH") {
            self.memory.chips_path = Some(PathBuf::from(path));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".companion")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.temperature < 0.0 || self.backend.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "backend.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.backend.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "backend.retry_attempts must be at least 1".into(),
            ));
        }

        if self.session.consistency_n == 0 {
            return Err(ConfigError::ValidationError(
                "session.consistency_n must be at least 1".into(),
            ));
        }

        if self.session.mood_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "session.mood_tick_ms must be > 0".into(),
            ));
        }

        if self.memory.short_term_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "memory.short_term_capacity must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
