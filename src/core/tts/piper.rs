//! Piper TTS over stdin/stdout.
//!
//! Each sentence spawns `piper --model <onnx> --output_raw`, writes the text
//! to stdin, and gathers raw PCM16LE 22050 Hz mono from stdout. Spawn and
//! pipe faults are retried twice with a fixed half-second delay; a sentence
//! that exceeds its deadline is killed and surfaced as a timeout so the
//! remaining sentences can continue.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Synthesizer, TtsError, TtsResult};
use crate::utils::process::run_captured;
use crate::utils::retry::{RetryPolicy, with_retry};

/// Default output rate of Piper voices used here.
pub const PIPER_SAMPLE_RATE: u32 = 22_050;

/// Configuration for the Piper adapter.
#[derive(Debug, Clone)]
pub struct PiperConfig {
    pub exe_path: PathBuf,
    pub model_path: PathBuf,
    pub sample_rate: u32,
    /// Per-sentence synthesis deadline.
    pub synthesis_timeout: Duration,
}

impl Default for PiperConfig {
    fn default() -> Self {
        Self {
            exe_path: PathBuf::new(),
            model_path: PathBuf::new(),
            sample_rate: PIPER_SAMPLE_RATE,
            synthesis_timeout: Duration::from_secs(15),
        }
    }
}

impl PiperConfig {
    /// Piper voices ship a JSON sidecar next to the model.
    pub fn model_config_path(&self) -> PathBuf {
        let mut path = self.model_path.as_os_str().to_owned();
        path.push(".json");
        PathBuf::from(path)
    }
}

/// Subprocess wrapper around the Piper binary.
pub struct PiperSynthesizer {
    config: PiperConfig,
    retry: RetryPolicy,
}

impl PiperSynthesizer {
    pub fn new(config: PiperConfig) -> TtsResult<Self> {
        if !config.exe_path.is_file() {
            return Err(TtsError::Configuration(format!(
                "piper executable not found: {}",
                config.exe_path.display()
            )));
        }
        if !config.model_path.is_file() {
            return Err(TtsError::Configuration(format!(
                "piper model not found: {}",
                config.model_path.display()
            )));
        }
        if !config.model_config_path().is_file() {
            return Err(TtsError::Configuration(format!(
                "piper model config not found: {}",
                config.model_config_path().display()
            )));
        }
        info!(model = %config.model_path.display(), "piper synthesizer initialized");
        Ok(Self {
            config,
            retry: RetryPolicy::fixed(3, Duration::from_millis(500)),
        })
    }

    async fn run_once(&self, text: &str) -> TtsResult<Bytes> {
        let mut cmd = Command::new(&self.config.exe_path);
        cmd.arg("--model")
            .arg(&self.config.model_path)
            .arg("--output_raw");

        let output = run_captured(
            cmd,
            Some(text.as_bytes().to_vec()),
            self.config.synthesis_timeout,
        )
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::TimedOut => TtsError::Timeout(self.config.synthesis_timeout),
            _ => TtsError::Process(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TtsError::Synthesis(stderr.trim().to_string()));
        }
        if output.stdout.is_empty() {
            warn!(text_len = text.len(), "piper produced empty audio");
            return Err(TtsError::Synthesis("empty audio output".to_string()));
        }

        debug!(
            bytes = output.stdout.len(),
            chars = text.len(),
            "sentence synthesized"
        );
        Ok(Bytes::from(output.stdout))
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    fn name(&self) -> &'static str {
        "piper"
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    async fn synthesize(&self, text: &str) -> TtsResult<Bytes> {
        if text.trim().is_empty() {
            return Ok(Bytes::new());
        }

        with_retry(self.retry, "piper_synthesize", TtsError::is_transient, || {
            self.run_once(text)
        })
        .await
    }
}
