//! Per-connection session state and the interrupt controller.
//!
//! The session exclusively owns its subordinates; pipeline tasks hold only
//! an `Arc<SessionShared>` (generation counter, per-turn flags) and the
//! egress sender. The interrupt path is O(1) and non-blocking: bump the
//! generation, cancel the turn token, emit `tts_stop`, rewind the dialog.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::dialog::DialogEngine;
use crate::handlers::ws::messages::{MessageRoute, OutgoingMessage};
use crate::persistence::{SessionRecord, SessionStore};

/// State shared between the session task, the turn pipeline, and the egress
/// sender.
pub struct SessionShared {
    /// Interrupt generation; every pipeline stage stamps its output with the
    /// value it started under.
    generation: AtomicU64,
    /// Whether the current turn has emitted `tts_start`.
    tts_started: AtomicBool,
}

impl SessionShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(0),
            tts_started: AtomicBool::new(false),
        })
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record that `tts_start` went out; returns true on the first call of
    /// the turn.
    pub fn mark_tts_started(&self) -> bool {
        !self.tts_started.swap(true, Ordering::AcqRel)
    }

    pub fn tts_started(&self) -> bool {
        self.tts_started.load(Ordering::Acquire)
    }

    pub fn reset_turn_flags(&self) {
        self.tts_started.store(false, Ordering::Release);
    }
}

/// Cancellation handle for the in-flight turn.
pub struct TurnHandle {
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Connection-level counters, logged at disconnect.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pub audio_chunks_received: AtomicU64,
    pub audio_bytes_received: AtomicU64,
    pub text_messages_received: AtomicU64,
    pub events_sent: AtomicU64,
    pub audio_bytes_sent: AtomicU64,
}

impl ConnectionStats {
    pub fn summary(&self) -> String {
        format!(
            "audio_in={} chunks/{} bytes, text_in={}, events_out={}, audio_out={} bytes",
            self.audio_chunks_received.load(Ordering::Relaxed),
            self.audio_bytes_received.load(Ordering::Relaxed),
            self.text_messages_received.load(Ordering::Relaxed),
            self.events_sent.load(Ordering::Relaxed),
            self.audio_bytes_sent.load(Ordering::Relaxed),
        )
    }
}

/// One client's state for the duration of one WebSocket.
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub shared: Arc<SessionShared>,
    pub dialog: Arc<Mutex<DialogEngine>>,
    pub current_turn: Arc<Mutex<Option<TurnHandle>>>,
}

impl Session {
    /// `shared` is created ahead of the session so the egress sender can
    /// check generations before `hello` arrives.
    pub fn new(id: String, dialog: DialogEngine, shared: Arc<SessionShared>) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            shared,
            dialog: Arc::new(Mutex::new(dialog)),
            current_turn: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a turn is currently in flight.
    pub async fn turn_active(&self) -> bool {
        self.current_turn.lock().await.is_some()
    }

    /// Barge-in: cancel the current turn and reject all of its stale output.
    ///
    /// Ordering follows the interrupt protocol: the generation bump makes
    /// the egress sender drop queued audio immediately, the token stops the
    /// pipeline at its next suspension point, `tts_stop` is emitted only if
    /// a `tts_start` went out this turn, and the dialog records the partial
    /// reply the user actually heard.
    pub async fn interrupt(&self, message_tx: &mpsc::Sender<MessageRoute>) {
        let generation = self.shared.bump_generation();

        if let Some(handle) = self.current_turn.lock().await.as_ref() {
            handle.cancel.cancel();
        }

        if self.shared.tts_started() {
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::TtsStop))
                .await;
        }

        let partial = self.dialog.lock().await.rewind_on_interrupt();
        info!(
            session = %self.id,
            generation,
            partial_chars = partial.as_deref().map(str::len).unwrap_or(0),
            "turn interrupted"
        );
    }

    /// Persist the current history. Best-effort: failures are logged by the
    /// caller, never fatal to the session.
    pub async fn persist(&self, store: &SessionStore) -> std::io::Result<()> {
        let turns = self.dialog.lock().await.snapshot();
        if turns.is_empty() {
            debug!(session = %self.id, "skipping persistence of empty history");
            return Ok(());
        }
        let record = SessionRecord::new(self.id.clone(), self.created_at, turns);
        store.save(&record).await
    }
}
