pub mod config;
pub mod core;
pub mod handlers;
pub mod persistence;
pub mod routes;
pub mod state;
pub mod utils;

// Re-export commonly used items for convenience
pub use crate::config::{ConfigError, ServerConfig};
pub use crate::core::*;
pub use crate::state::AppState;
