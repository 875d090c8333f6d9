//! Backend process supervision.
//!
//! The supervisor owns the llama.cpp server as a child process and presents a
//! single health gate to the dialog engine. A dedicated task probes the HTTP
//! health endpoint on an interval; three consecutive failures (or an explicit
//! unhealthy mark from the streaming client) trigger a terminate-and-respawn
//! cycle with exponential backoff. After the restart budget is exhausted the
//! backend is permanently dead and LLM calls fail fast.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::utils::process::shutdown_child;

/// Observable backend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendHealth {
    Starting,
    Healthy,
    Unhealthy,
    Restarting,
    Dead,
}

impl BackendHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendHealth::Starting => "starting",
            BackendHealth::Healthy => "healthy",
            BackendHealth::Unhealthy => "unhealthy",
            BackendHealth::Restarting => "restarting",
            BackendHealth::Dead => "dead",
        }
    }
}

/// Configuration for the supervised llama.cpp server.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub exe_path: PathBuf,
    pub model_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub gpu_layers: u32,
    pub context_size: u32,
    pub startup_timeout: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub health_connect_timeout: Duration,
    /// Consecutive probe failures before a restart is triggered.
    pub unhealthy_after_failures: u32,
    pub max_restarts: u32,
    pub restart_backoff_cap: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            exe_path: PathBuf::new(),
            model_path: PathBuf::new(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            gpu_layers: 99,
            context_size: 4096,
            startup_timeout: Duration::from_secs(60),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            health_connect_timeout: Duration::from_secs(2),
            unhealthy_after_failures: 3,
            max_restarts: 5,
            restart_backoff_cap: Duration::from_secs(30),
        }
    }
}

impl BackendConfig {
    pub fn chat_endpoint(&self) -> String {
        format!("http://{}:{}/v1/chat/completions", self.host, self.port)
    }

    fn health_endpoint(&self) -> String {
        format!("http://{}:{}/health", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("failed to spawn backend: {0}")]
    Spawn(String),
    #[error("backend not healthy within {0:?}")]
    StartupTimeout(Duration),
    #[error("backend permanently dead")]
    Dead,
}

/// Owns the backend child process and its health state.
pub struct BackendSupervisor {
    config: BackendConfig,
    http: reqwest::Client,
    health_tx: watch::Sender<BackendHealth>,
    child: Mutex<Option<Child>>,
    restart_count: AtomicU32,
    probe_now: Notify,
    shutdown_token: CancellationToken,
}

impl BackendSupervisor {
    pub fn new(config: BackendConfig) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.health_connect_timeout)
            .timeout(config.health_timeout)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        let (health_tx, _) = watch::channel(BackendHealth::Starting);

        Arc::new(Self {
            config,
            http,
            health_tx,
            child: Mutex::new(None),
            restart_count: AtomicU32::new(0),
            probe_now: Notify::new(),
            shutdown_token: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Current state snapshot.
    pub fn health(&self) -> BackendHealth {
        *self.health_tx.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.health() == BackendHealth::Healthy
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::Relaxed)
    }

    /// Block until the backend is healthy, or fail fast once it is dead.
    pub async fn wait_healthy(&self) -> Result<(), SupervisorError> {
        let mut rx = self.health_tx.subscribe();
        loop {
            match *rx.borrow_and_update() {
                BackendHealth::Healthy => return Ok(()),
                BackendHealth::Dead => return Err(SupervisorError::Dead),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(SupervisorError::Dead);
            }
        }
    }

    /// Flag the backend unhealthy from outside the health loop (stream stall
    /// or connection error) and schedule an immediate probe.
    pub fn mark_unhealthy(&self, reason: &str) {
        if self.health() == BackendHealth::Dead {
            return;
        }
        warn!(reason, "backend marked unhealthy");
        self.set_health(BackendHealth::Unhealthy);
        self.probe_now.notify_one();
    }

    /// Spawn the process and wait until the health endpoint answers 200, up
    /// to the startup timeout. On timeout the child is killed and the
    /// backend marked dead.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        self.set_health(BackendHealth::Starting);
        self.spawn_process().await?;

        if self.await_ready(self.config.startup_timeout).await {
            info!("backend ready");
            self.set_health(BackendHealth::Healthy);
            Ok(())
        } else {
            error!(timeout = ?self.config.startup_timeout, "backend failed to become ready");
            self.stop_process().await;
            self.set_health(BackendHealth::Dead);
            Err(SupervisorError::StartupTimeout(self.config.startup_timeout))
        }
    }

    /// Run the periodic health loop until shutdown. One task per server.
    pub fn spawn_health_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_health_loop().await })
    }

    async fn run_health_loop(&self) {
        let mut ticker = interval(self.config.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.probe_now.notified() => {}
            }

            if self.health() == BackendHealth::Dead {
                break;
            }

            if self.probe().await {
                consecutive_failures = 0;
                if self.health() != BackendHealth::Healthy {
                    info!("backend health restored");
                    self.set_health(BackendHealth::Healthy);
                }
                continue;
            }

            consecutive_failures += 1;
            debug!(consecutive_failures, "backend health probe failed");

            let externally_flagged = self.health() == BackendHealth::Unhealthy;
            if externally_flagged
                || consecutive_failures >= self.config.unhealthy_after_failures
            {
                self.set_health(BackendHealth::Unhealthy);
                consecutive_failures = 0;
                if self.restart().await.is_err() {
                    break;
                }
            }
        }
        debug!("health loop exited");
    }

    /// Probe process liveness, then the HTTP health endpoint.
    async fn probe(&self) -> bool {
        {
            let mut child = self.child.lock().await;
            match child.as_mut().map(|c| c.try_wait()) {
                None => return false,
                Some(Ok(Some(status))) => {
                    warn!(?status, "backend process exited");
                    *child = None;
                    return false;
                }
                Some(Err(e)) => {
                    warn!("failed to poll backend process: {e}");
                    return false;
                }
                Some(Ok(None)) => {}
            }
        }

        match self.http.get(self.config.health_endpoint()).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("health request failed: {e}");
                false
            }
        }
    }

    /// Terminate and respawn with exponential backoff. Marks the backend
    /// dead once the restart budget is spent.
    async fn restart(&self) -> Result<(), SupervisorError> {
        self.set_health(BackendHealth::Restarting);
        self.stop_process().await;

        loop {
            let attempt = self.restart_count.fetch_add(1, Ordering::Relaxed) + 1;
            if attempt > self.config.max_restarts {
                error!(
                    attempts = self.config.max_restarts,
                    "restart budget exhausted, backend permanently dead"
                );
                self.set_health(BackendHealth::Dead);
                return Err(SupervisorError::Dead);
            }

            let backoff = backoff_delay(attempt, self.config.restart_backoff_cap);
            warn!(attempt, ?backoff, "restarting backend");
            tokio::select! {
                _ = self.shutdown_token.cancelled() => return Err(SupervisorError::Dead),
                _ = sleep(backoff) => {}
            }

            if let Err(e) = self.spawn_process().await {
                warn!("restart spawn failed: {e}");
                continue;
            }
            if self.await_ready(self.config.startup_timeout).await {
                info!(attempt, "backend restarted");
                self.restart_count.store(0, Ordering::Relaxed);
                self.set_health(BackendHealth::Healthy);
                return Ok(());
            }
            self.stop_process().await;
        }
    }

    /// Poll the health endpoint until it answers or the deadline passes.
    async fn await_ready(&self, deadline: Duration) -> bool {
        let poll = async {
            loop {
                match self.http.get(self.config.health_endpoint()).send().await {
                    Ok(resp) if resp.status().is_success() => return,
                    _ => sleep(Duration::from_secs(1)).await,
                }
            }
        };
        timeout(deadline, poll).await.is_ok()
    }

    async fn spawn_process(&self) -> Result<(), SupervisorError> {
        let mut cmd = Command::new(&self.config.exe_path);
        cmd.arg("-m")
            .arg(&self.config.model_path)
            .arg("-ngl")
            .arg(self.config.gpu_layers.to_string())
            .arg("-c")
            .arg(self.config.context_size.to_string())
            .arg("--host")
            .arg(&self.config.host)
            .arg("--port")
            .arg(self.config.port.to_string())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn(e.to_string()))?;
        let pid = child.id();
        info!(?pid, model = %self.config.model_path.display(), "backend process spawned");

        spawn_log_forwarders(&mut child);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn stop_process(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            match shutdown_child(&mut child, Duration::from_secs(5)).await {
                Ok(status) => debug!(?status, "backend process stopped"),
                Err(e) => warn!("error stopping backend process: {e}"),
            }
        }
    }

    /// Terminate the child and stop the health loop. Called at server stop.
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");
        self.shutdown_token.cancel();
        self.stop_process().await;
        self.set_health(BackendHealth::Dead);
    }

    fn set_health(&self, health: BackendHealth) {
        self.health_tx.send_replace(health);
    }
}

/// `2^(attempt-1)` seconds, capped.
fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let secs = 1u64 << (attempt.saturating_sub(1)).min(30);
    Duration::from_secs(secs).min(cap)
}

/// Forward backend stdout/stderr lines to the tracing log at debug level.
fn spawn_log_forwarders(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "backend", "{line}");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "backend", "{line}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(1, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(5, cap), Duration::from_secs(16));
        assert_eq!(backoff_delay(6, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(12, cap), Duration::from_secs(30));
    }

    #[test]
    fn endpoints_are_derived_from_host_and_port() {
        let config = BackendConfig {
            host: "127.0.0.1".to_string(),
            port: 9090,
            ..BackendConfig::default()
        };
        assert_eq!(
            config.chat_endpoint(),
            "http://127.0.0.1:9090/v1/chat/completions"
        );
        assert_eq!(config.health_endpoint(), "http://127.0.0.1:9090/health");
    }

    #[tokio::test]
    async fn starts_in_starting_state() {
        let supervisor = BackendSupervisor::new(BackendConfig::default());
        assert_eq!(supervisor.health(), BackendHealth::Starting);
        assert!(!supervisor.is_healthy());
    }

    #[tokio::test]
    async fn mark_unhealthy_transitions_state() {
        let supervisor = BackendSupervisor::new(BackendConfig::default());
        supervisor.mark_unhealthy("test stall");
        assert_eq!(supervisor.health(), BackendHealth::Unhealthy);
    }

    #[tokio::test]
    async fn wait_healthy_fails_fast_when_dead() {
        let supervisor = BackendSupervisor::new(BackendConfig::default());
        supervisor.shutdown().await;
        assert!(matches!(
            supervisor.wait_healthy().await,
            Err(SupervisorError::Dead)
        ));
    }

    #[tokio::test]
    async fn wait_healthy_wakes_on_transition() {
        let supervisor = BackendSupervisor::new(BackendConfig::default());
        let waiter = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.wait_healthy().await })
        };
        supervisor.set_health(BackendHealth::Healthy);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .expect("waiter should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn mark_unhealthy_after_death_is_ignored() {
        let supervisor = BackendSupervisor::new(BackendConfig::default());
        supervisor.shutdown().await;
        supervisor.mark_unhealthy("too late");
        assert_eq!(supervisor.health(), BackendHealth::Dead);
    }
}
