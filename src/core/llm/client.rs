//! Streaming chat client for the supervised backend.
//!
//! Talks to the llama.cpp OpenAI-compatible chat endpoint with `stream: true`
//! and parses the SSE chunk framing (`data: {...}` lines, `data: [DONE]`
//! terminator). Establishing the request is retried on transient failures;
//! once deltas are flowing, a broken or stalled stream fails the turn and
//! flags the backend unhealthy so the supervisor steps in.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::supervisor::{BackendSupervisor, SupervisorError};
use crate::core::dialog::ChatMessage;
use crate::utils::retry::{RetryPolicy, with_retry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("backend unavailable")]
    BackendUnavailable,
    #[error("request failed: {0}")]
    Request(String),
    #[error("backend returned status {0}")]
    Status(u16),
    #[error("stream stalled for {0:?}")]
    StreamStalled(Duration),
    #[error("stream broke mid-reply: {0}")]
    StreamBroken(String),
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::StreamStalled(_) | LlmError::StreamBroken(_) => true,
            LlmError::Status(code) => *code >= 500,
            LlmError::BackendUnavailable | LlmError::Cancelled => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Deadline for receiving response headers.
    pub request_timeout: Duration,
    /// Soft deadline between streamed chunks; exceeding it marks the backend
    /// unhealthy.
    pub chunk_inactivity_timeout: Duration,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            chunk_inactivity_timeout: Duration::from_secs(30),
        }
    }
}

/// One SSE payload from the chat endpoint; only the delta content matters.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming HTTP client gated on supervisor health.
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmClientConfig,
    supervisor: Arc<BackendSupervisor>,
}

impl LlmClient {
    pub fn new(config: LlmClientConfig, supervisor: Arc<BackendSupervisor>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            config,
            supervisor,
        }
    }

    /// Stream one reply for the given history.
    ///
    /// Every text delta is pushed into `delta_tx` as it arrives; the full
    /// assembled reply is returned once the backend signals end-of-stream.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
        delta_tx: mpsc::Sender<String>,
    ) -> LlmResult<String> {
        // Health gate: never issue a request against an unhealthy backend.
        let gate = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            gate = self.supervisor.wait_healthy() => gate,
        };
        match gate {
            Ok(()) => {}
            Err(SupervisorError::Dead) => return Err(LlmError::BackendUnavailable),
            Err(e) => return Err(LlmError::Request(e.to_string())),
        }

        let url = self.supervisor.config().chat_endpoint();
        let payload = json!({
            "messages": messages,
            "stream": true,
        });

        // Transient connection failures get three retries (1s, 2s, 4s); 4xx
        // responses are not retried.
        let policy = RetryPolicy::exponential(4, Duration::from_secs(1), Duration::from_secs(4));
        let request = with_retry(policy, "llm_chat_request", LlmError::is_transient, || async {
            let resp = timeout(
                self.config.request_timeout,
                self.http.post(&url).json(&payload).send(),
            )
            .await
            .map_err(|_| LlmError::Request("request timed out".to_string()))?
            .map_err(|e| LlmError::Request(e.to_string()))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(LlmError::Status(status.as_u16()));
            }
            Ok(resp)
        });
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            response = request => response?,
        };

        debug!("reply stream opened");
        let mut stream = response.bytes_stream();
        let mut line_buf = String::new();
        let mut full_reply = String::new();
        let mut done = false;

        while !done {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                next = timeout(self.config.chunk_inactivity_timeout, stream.next()) => {
                    match next {
                        Err(_) => {
                            self.supervisor.mark_unhealthy("reply stream stalled");
                            return Err(LlmError::StreamStalled(
                                self.config.chunk_inactivity_timeout,
                            ));
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            self.supervisor.mark_unhealthy("reply stream broke");
                            return Err(LlmError::StreamBroken(e.to_string()));
                        }
                        Ok(Some(Ok(bytes))) => bytes,
                    }
                }
            };

            line_buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = line_buf.find('\n') {
                let line: String = line_buf.drain(..=newline).collect();
                match parse_sse_line(line.trim()) {
                    SseEvent::Delta(delta) => {
                        full_reply.push_str(&delta);
                        if delta_tx.send(delta).await.is_err() {
                            // Downstream gone (interrupt drain); stop reading.
                            return Err(LlmError::Cancelled);
                        }
                        // Explicit yield between deltas keeps the session
                        // task responsive under a fast backend.
                        tokio::task::yield_now().await;
                    }
                    SseEvent::Done => {
                        done = true;
                        break;
                    }
                    SseEvent::Ignored => {}
                }
            }
        }

        info!(chars = full_reply.len(), "reply stream complete");
        Ok(full_reply)
    }
}

enum SseEvent {
    Delta(String),
    Done,
    Ignored,
}

/// Parse one SSE line of the chat stream.
fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return SseEvent::Ignored;
    };
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let delta = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content);
            match delta {
                Some(text) if !text.is_empty() => SseEvent::Delta(text),
                _ => SseEvent::Ignored,
            }
        }
        Err(_) => SseEvent::Ignored,
    }
}
