//! Server configuration.
//!
//! All tunables live in one typed record with enumerated fields; environment
//! variables override the defaults (`SERVER_HOST`, `SERVER_PORT`,
//! `LLAMA_EXE_PATH`, `LLAMA_MODEL_PATH`, `PIPER_EXE_PATH`,
//! `PIPER_MODEL_PATH`, `WHISPER_EXE_PATH`, `WHISPER_MODEL_PATH`,
//! `SESSIONS_DIR`). Validation runs after loading and fails startup with
//! exit code 2 when a binary or model path is missing.

use std::path::PathBuf;

mod env;
mod validation;

use crate::core::dialog::DialogConfig;
use crate::core::llm::{BackendConfig, LlmClientConfig};
use crate::core::prefetch::DEFAULT_PREFETCH_DEPTH;
use crate::core::segmenter::SegmenterConfig;
use crate::core::stt::WhisperConfig;
use crate::core::tts::PiperConfig;

/// Configuration loading/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("{name} is not configured (set {env_var})")]
    Missing {
        name: &'static str,
        env_var: &'static str,
    },
    #[error("{name} not found: {path}")]
    PathNotFound {
        name: &'static str,
        path: PathBuf,
    },
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Listener
    pub host: String,
    pub port: u16,

    // Supervised LLM backend and its streaming client
    pub backend: BackendConfig,
    pub llm: LlmClientConfig,

    // Inference engine adapters
    pub whisper: WhisperConfig,
    pub piper: PiperConfig,

    // Pipeline tuning
    pub segmenter: SegmenterConfig,
    pub dialog: DialogConfig,
    pub prefetch_depth: usize,

    // Session persistence
    pub sessions_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            backend: BackendConfig::default(),
            llm: LlmClientConfig::default(),
            whisper: WhisperConfig::default(),
            piper: PiperConfig::default(),
            segmenter: SegmenterConfig::default(),
            dialog: DialogConfig::default(),
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
            sessions_dir: PathBuf::from("sessions"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables over typed defaults.
    /// Does not validate paths; call [`validate`](Self::validate) before
    /// using the config to start engines.
    pub fn from_env() -> Result<Self, ConfigError> {
        env::load()
    }

    /// Check that every configured engine path exists and the pipeline
    /// tunables are coherent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)
    }

    /// Listener address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
