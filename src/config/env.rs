//! Environment variable loading.
//!
//! Builds a [`ServerConfig`](super::ServerConfig) from typed defaults with
//! environment overrides. Parsing is strict: a present-but-malformed value is
//! a configuration error, not a silent fallback.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{ConfigError, ServerConfig};

pub(super) fn load() -> Result<ServerConfig, ConfigError> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_string("SERVER_HOST") {
        config.host = host;
    }
    if let Some(port) = env_parse::<u16>("SERVER_PORT")? {
        config.port = port;
    }

    if let Some(path) = env_path("LLAMA_EXE_PATH") {
        config.backend.exe_path = path;
    }
    if let Some(path) = env_path("LLAMA_MODEL_PATH") {
        config.backend.model_path = path;
    }

    if let Some(path) = env_path("PIPER_EXE_PATH") {
        config.piper.exe_path = path;
    }
    if let Some(path) = env_path("PIPER_MODEL_PATH") {
        config.piper.model_path = path;
    }

    if let Some(path) = env_path("WHISPER_EXE_PATH") {
        config.whisper.exe_path = path;
    }
    if let Some(path) = env_path("WHISPER_MODEL_PATH") {
        config.whisper.model_path = path;
    }

    if let Some(dir) = env_path("SESSIONS_DIR") {
        config.sessions_dir = dir;
    }

    Ok(config)
}

fn env_string(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &'static str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_parse<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}
