//! Text-to-speech provider abstraction.

use async_trait::async_trait;
use bytes::Bytes;

mod piper;

pub use piper::{PiperConfig, PiperSynthesizer};

/// TTS-specific error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("audio generation failed: {0}")]
    Synthesis(String),
    #[error("synthesizer process error: {0}")]
    Process(String),
    #[error("synthesis timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl TtsError {
    /// Connection/pipe faults are worth a retry; timeouts abort the sentence.
    pub fn is_transient(&self) -> bool {
        matches!(self, TtsError::Process(_))
    }
}

pub type TtsResult<T> = Result<T, TtsError>;

/// Base trait for text-to-speech providers.
///
/// `synthesize` gathers the provider's output to completion and returns raw
/// PCM16LE mono audio at `sample_rate()`.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Synthesize one sentence to raw audio bytes.
    async fn synthesize(&self, text: &str) -> TtsResult<Bytes>;
}
