//! Configuration validation.
//!
//! The three inference engines are external binaries; a missing executable or
//! model file is a startup-time configuration error (exit code 2), not
//! something to discover on the first turn.

use std::path::Path;

use super::{ConfigError, ServerConfig};

pub(super) fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    require_file(
        "llama executable",
        "LLAMA_EXE_PATH",
        &config.backend.exe_path,
    )?;
    require_file(
        "llama model",
        "LLAMA_MODEL_PATH",
        &config.backend.model_path,
    )?;
    require_file("piper executable", "PIPER_EXE_PATH", &config.piper.exe_path)?;
    require_file("piper model", "PIPER_MODEL_PATH", &config.piper.model_path)?;
    require_file(
        "whisper executable",
        "WHISPER_EXE_PATH",
        &config.whisper.exe_path,
    )?;
    require_file(
        "whisper model",
        "WHISPER_MODEL_PATH",
        &config.whisper.model_path,
    )?;

    if config.segmenter.min_utterance_frames >= config.segmenter.max_utterance_frames {
        return Err(ConfigError::InvalidValue {
            name: "segmenter.min_utterance_frames",
            value: format!(
                "{} (must be below max_utterance_frames {})",
                config.segmenter.min_utterance_frames, config.segmenter.max_utterance_frames
            ),
        });
    }
    if !(0.0..=1.0).contains(&config.segmenter.speech_threshold) {
        return Err(ConfigError::InvalidValue {
            name: "segmenter.speech_threshold",
            value: config.segmenter.speech_threshold.to_string(),
        });
    }
    if config.prefetch_depth == 0 {
        return Err(ConfigError::InvalidValue {
            name: "prefetch_depth",
            value: "0".to_string(),
        });
    }

    Ok(())
}

fn require_file(name: &'static str, env_var: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Missing { name, env_var });
    }
    if !path.is_file() {
        return Err(ConfigError::PathNotFound {
            name,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Config whose six binary/model paths all exist.
    fn config_with_real_paths(dir: &TempDir) -> ServerConfig {
        let mut config = ServerConfig::default();
        let touch = |name: &str| -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, b"stub").expect("write stub");
            path
        };
        config.backend.exe_path = touch("llama-server");
        config.backend.model_path = touch("model.gguf");
        config.piper.exe_path = touch("piper");
        config.piper.model_path = touch("voice.onnx");
        std::fs::write(dir.path().join("voice.onnx.json"), b"{}").expect("sidecar");
        config.whisper.exe_path = touch("whisper-cli");
        config.whisper.model_path = touch("ggml.bin");
        config
    }

    #[test]
    fn complete_config_validates() {
        let dir = TempDir::new().expect("temp dir");
        let config = config_with_real_paths(&dir);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn unset_path_is_missing() {
        let config = ServerConfig::default();
        let err = validate(&config).err().expect("should fail");
        assert!(matches!(
            err,
            ConfigError::Missing {
                env_var: "LLAMA_EXE_PATH",
                ..
            }
        ));
    }

    #[test]
    fn nonexistent_path_is_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = config_with_real_paths(&dir);
        config.piper.model_path = PathBuf::from("/nonexistent/voice.onnx");
        let err = validate(&config).err().expect("should fail");
        assert!(matches!(err, ConfigError::PathNotFound { name: "piper model", .. }));
    }

    #[test]
    fn degenerate_segmenter_bounds_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = config_with_real_paths(&dir);
        config.segmenter.min_utterance_frames = 600;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_prefetch_depth_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let mut config = config_with_real_paths(&dir);
        config.prefetch_depth = 0;
        assert!(validate(&config).is_err());
    }
}
