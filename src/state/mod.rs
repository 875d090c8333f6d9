//! Application state shared across handlers.
//!
//! Built once at startup and passed into every session; there are no
//! module-level singletons. The supervisor is process-global and shared
//! across sessions, per-session state lives entirely inside the WebSocket
//! task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::ServerConfig;
use crate::core::llm::{BackendSupervisor, LlmClient};
use crate::core::stt::{SttError, Transcriber, WhisperTranscriber};
use crate::core::tts::{PiperSynthesizer, Synthesizer, TtsError};
use crate::persistence::SessionStore;

/// Errors building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("stt init failed: {0}")]
    Stt(#[from] SttError),
    #[error("tts init failed: {0}")]
    Tts(#[from] TtsError),
    #[error("sessions directory unusable: {0}")]
    Sessions(#[from] std::io::Error),
}

/// Service locator handed to the session factory.
pub struct AppState {
    pub config: ServerConfig,
    pub supervisor: Arc<BackendSupervisor>,
    pub llm: Arc<LlmClient>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub store: Arc<SessionStore>,
    active_sessions: AtomicUsize,
}

impl AppState {
    pub async fn new(
        config: ServerConfig,
        supervisor: Arc<BackendSupervisor>,
    ) -> Result<Arc<Self>, StateError> {
        let llm = Arc::new(LlmClient::new(config.llm.clone(), Arc::clone(&supervisor)));
        let transcriber: Arc<dyn Transcriber> =
            Arc::new(WhisperTranscriber::new(config.whisper.clone())?);
        let synthesizer: Arc<dyn Synthesizer> =
            Arc::new(PiperSynthesizer::new(config.piper.clone())?);

        let store = Arc::new(SessionStore::new(config.sessions_dir.clone()));
        store.ensure_dir().await?;

        Ok(Arc::new(Self {
            config,
            supervisor,
            llm,
            transcriber,
            synthesizer,
            store,
            active_sessions: AtomicUsize::new(0),
        }))
    }

    pub fn session_opened(&self) -> usize {
        self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn session_closed(&self) -> usize {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed) - 1
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}
