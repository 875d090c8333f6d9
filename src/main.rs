use std::process::ExitCode;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use colloquy::core::llm::BackendSupervisor;
use colloquy::{AppState, ServerConfig, routes};

/// Exit codes: 0 clean shutdown, 2 configuration error, 3 backend dead at
/// startup.
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_BACKEND_DEAD: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    // Load and validate configuration
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(e) = config.validate() {
        error!("configuration error: {e}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let address = config.address();
    info!("starting voice dialogue server on {address}");

    // Start the supervised LLM backend before accepting connections
    let supervisor = BackendSupervisor::new(config.backend.clone());
    if let Err(e) = supervisor.start().await {
        error!("backend failed to start: {e}");
        return ExitCode::from(EXIT_BACKEND_DEAD);
    }
    let health_loop = supervisor.spawn_health_loop();

    // Application state shared across handlers
    let app_state = match AppState::new(config, supervisor.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("startup error: {e}");
            supervisor.shutdown().await;
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let app = Router::new()
        .merge(routes::api::create_api_router())
        .merge(routes::ws::create_ws_router())
        .with_state(app_state);

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {address}: {e}");
            supervisor.shutdown().await;
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    info!("server listening on {address}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    let result = serve.await;

    // Drain: stop the health loop and terminate the backend child
    supervisor.shutdown().await;
    health_loop.abort();

    match result {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("server error: {e}");
            ExitCode::FAILURE
        }
    }
}
