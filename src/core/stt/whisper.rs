//! Whisper.cpp CLI transcriber.
//!
//! The utterance is written to a temporary 16 kHz mono PCM16 WAV file and the
//! whisper binary is invoked on it with timestamps disabled; stdout is the
//! hypothesis. The subprocess boundary keeps model inference off the async
//! runtime entirely.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{SttError, SttResult, Transcriber};
use crate::core::audio::{SAMPLE_RATE, f32_to_pcm16le};
use crate::utils::process::run_captured;

/// Configuration for the whisper.cpp CLI adapter.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub exe_path: PathBuf,
    pub model_path: PathBuf,
    pub language: String,
    pub timeout: Duration,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            exe_path: PathBuf::new(),
            model_path: PathBuf::new(),
            language: "en".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Subprocess wrapper around a whisper.cpp-style binary.
pub struct WhisperTranscriber {
    config: WhisperConfig,
}

impl WhisperTranscriber {
    pub fn new(config: WhisperConfig) -> SttResult<Self> {
        if !config.exe_path.is_file() {
            return Err(SttError::Configuration(format!(
                "whisper executable not found: {}",
                config.exe_path.display()
            )));
        }
        if !config.model_path.is_file() {
            return Err(SttError::Configuration(format!(
                "whisper model not found: {}",
                config.model_path.display()
            )));
        }
        info!(model = %config.model_path.display(), "whisper transcriber initialized");
        Ok(Self { config })
    }

    fn scratch_wav_path() -> PathBuf {
        std::env::temp_dir().join(format!("utterance-{}.wav", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, samples: &[f32]) -> SttResult<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let wav = encode_wav_pcm16(samples, SAMPLE_RATE);
        let wav_path = Self::scratch_wav_path();
        tokio::fs::write(&wav_path, &wav)
            .await
            .map_err(|e| SttError::Process(format!("failed to stage utterance wav: {e}")))?;

        let mut cmd = Command::new(&self.config.exe_path);
        cmd.arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg(&wav_path)
            .arg("-l")
            .arg(&self.config.language)
            .arg("-nt");

        let result = run_captured(cmd, None, self.config.timeout).await;
        if let Err(e) = tokio::fs::remove_file(&wav_path).await {
            debug!(path = %wav_path.display(), "failed to remove scratch wav: {e}");
        }

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                return Err(SttError::Timeout(self.config.timeout));
            }
            Err(e) => return Err(SttError::Process(e.to_string())),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = ?output.status.code(), "whisper exited with failure");
            return Err(SttError::Transcription(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(chars = text.len(), "transcription complete");
        Ok(text)
    }

    fn engine_name(&self) -> &'static str {
        "whisper.cpp"
    }
}

/// Minimal RIFF/WAVE encoder: PCM16LE mono.
fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data = f32_to_pcm16le(samples);
    let byte_rate = sample_rate * 2;
    let data_len = data.len() as u32;

    let mut wav = Vec::with_capacity(44 + data.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(&data);
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let wav = encode_wav_pcm16(&[0.0, 0.5, -0.5], 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        // 3 samples * 2 bytes
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len, 6);
        assert_eq!(wav.len(), 44 + 6);
        // sample rate field
        let rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(rate, 16_000);
    }

    #[test]
    fn missing_executable_is_a_configuration_error() {
        let config = WhisperConfig {
            exe_path: PathBuf::from("/nonexistent/whisper-cli"),
            model_path: PathBuf::from("/nonexistent/model.bin"),
            ..WhisperConfig::default()
        };
        let err = WhisperTranscriber::new(config).err().expect("should fail");
        assert!(matches!(err, SttError::Configuration(_)));
    }

    #[test]
    fn existing_paths_pass_validation() {
        let exe = tempfile::NamedTempFile::new().expect("temp exe");
        let model = tempfile::NamedTempFile::new().expect("temp model");
        let config = WhisperConfig {
            exe_path: exe.path().to_path_buf(),
            model_path: model.path().to_path_buf(),
            ..WhisperConfig::default()
        };
        assert!(WhisperTranscriber::new(config).is_ok());
    }
}
