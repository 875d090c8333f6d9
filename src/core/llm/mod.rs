//! Dialog backend: supervised llama.cpp process plus its streaming client.

mod client;
mod supervisor;

pub use client::{LlmClient, LlmClientConfig, LlmError, LlmResult};
pub use supervisor::{BackendConfig, BackendHealth, BackendSupervisor, SupervisorError};
