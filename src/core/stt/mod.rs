//! Speech-to-text provider abstraction.

use async_trait::async_trait;

mod whisper;

pub use whisper::{WhisperConfig, WhisperTranscriber};

/// Error types for STT operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("model process error: {0}")]
    Process(String),
    #[error("transcription timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type SttResult<T> = Result<T, SttError>;

/// Base trait for speech-to-text providers.
///
/// Implementations run the model off the async runtime (worker thread or
/// subprocess); a call transcribes one complete utterance and returns the
/// best hypothesis as a trimmed string, possibly empty.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance of 16 kHz mono f32 samples.
    async fn transcribe(&self, samples: &[f32]) -> SttResult<String>;

    /// Provider name for logging.
    fn engine_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTranscriber;

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(&self, samples: &[f32]) -> SttResult<String> {
            Ok(format!("heard {} samples", samples.len()))
        }

        fn engine_name(&self) -> &'static str {
            "echo"
        }
    }

    #[tokio::test]
    async fn trait_object_transcribes() {
        let transcriber: Box<dyn Transcriber> = Box::new(EchoTranscriber);
        let text = transcriber.transcribe(&[0.0; 320]).await.expect("ok");
        assert_eq!(text, "heard 320 samples");
        assert_eq!(transcriber.engine_name(), "echo");
    }
}
