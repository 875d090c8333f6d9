pub mod audio;
pub mod dialog;
pub mod llm;
pub mod prefetch;
pub mod segmenter;
pub mod splitter;
pub mod stt;
pub mod tts;
pub mod vad;

// Re-export commonly used types for convenience
pub use dialog::{ChatMessage, DialogConfig, DialogEngine, Role, Turn};
pub use llm::{
    BackendConfig, BackendHealth, BackendSupervisor, LlmClient, LlmClientConfig, LlmError,
    SupervisorError,
};
pub use segmenter::{SegmenterConfig, Utterance, UtteranceSegmenter};
pub use splitter::SentenceSplitter;
pub use stt::{SttError, Transcriber, WhisperConfig, WhisperTranscriber};
pub use tts::{PiperConfig, PiperSynthesizer, Synthesizer, TtsError};
