//! Axum WebSocket handler for the voice endpoint.
//!
//! One connection runs four cooperative tasks: this receive loop, a single
//! sender task that owns the socket sink, the segmenter feed, and the turn
//! driver. The receive loop is also the control plane: `hello` activates the
//! session, `interrupt` runs the O(1) barge-in path inline so it can never
//! queue behind pipeline work.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::audio::{BYTES_PER_SAMPLE, FrameReassembler, SAMPLE_RATE};
use crate::core::dialog::DialogEngine;
use crate::core::segmenter::{SegmenterConfig, UtteranceSegmenter};
use crate::handlers::ws::messages::{ErrorCode, IncomingMessage, MessageRoute, OutgoingMessage};
use crate::handlers::ws::session::{ConnectionStats, Session, SessionShared};
use crate::handlers::ws::turn::{TurnInput, run_turn_driver};
use crate::persistence::is_valid_session_id;
use crate::state::AppState;
use crate::utils::rate_limit::RateGate;

/// Audio accepted before `hello`: at most one second, then discarded.
const PREHELLO_BUFFER_LIMIT: usize = SAMPLE_RATE as usize * BYTES_PER_SAMPLE;

/// Outbound channel depth; sized generously for audio bursts.
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Upgrade handler for `GET /ws/audio`.
pub async fn ws_audio_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("voice connection upgrade requested");
    ws.on_upgrade(move |socket| handle_audio_socket(socket, state))
}

/// The per-session resources spun up once `hello` arrives.
struct ActiveSession {
    session: Arc<Session>,
    audio_tx: mpsc::Sender<Bytes>,
    turn_tx: mpsc::Sender<TurnInput>,
    segmenter_task: tokio::task::JoinHandle<()>,
    driver_task: tokio::task::JoinHandle<()>,
}

async fn handle_audio_socket(socket: WebSocket, app: Arc<AppState>) {
    let active_count = app.session_opened();
    info!(active_sessions = active_count, "voice connection established");

    let (mut sink, mut stream) = socket.split();
    let shared = SessionShared::new();
    let stats = Arc::new(ConnectionStats::default());
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    // Single sender task owns the sink. Audio routes carry the generation
    // they were synthesized under; anything stale is dropped here, which is
    // what empties the egress path the instant an interrupt bumps the
    // counter.
    let sender_task = {
        let shared = Arc::clone(&shared);
        let stats = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Some(route) = message_rx.recv().await {
                let result = match route {
                    MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                        Ok(json) => {
                            stats.events_sent.fetch_add(1, Ordering::Relaxed);
                            sink.send(Message::Text(json.into())).await
                        }
                        Err(e) => {
                            error!("failed to serialize outgoing message: {e}");
                            continue;
                        }
                    },
                    MessageRoute::Audio { data, generation } => {
                        if generation != shared.current_generation() {
                            debug!(generation, "dropping stale audio chunk");
                            continue;
                        }
                        stats
                            .audio_bytes_sent
                            .fetch_add(data.len() as u64, Ordering::Relaxed);
                        sink.send(Message::Binary(data)).await
                    }
                };
                if let Err(e) = result {
                    warn!("failed to send frame: {e}");
                    break;
                }
            }
        })
    };

    let session_cancel = CancellationToken::new();
    let mut active: Option<ActiveSession> = None;
    let mut prehello_buffer: Vec<Bytes> = Vec::new();
    let mut prehello_bytes = 0usize;
    let mut prehello_overflowed = false;

    loop {
        let message = tokio::select! {
            _ = session_cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!("websocket error: {e}");
                    break;
                }
                None => {
                    info!("connection closed by client");
                    break;
                }
            },
        };

        match message {
            Message::Binary(data) => {
                stats.audio_chunks_received.fetch_add(1, Ordering::Relaxed);
                stats
                    .audio_bytes_received
                    .fetch_add(data.len() as u64, Ordering::Relaxed);

                match &active {
                    Some(active) => {
                        if active.audio_tx.send(data).await.is_err() {
                            warn!("segmenter feed closed, dropping connection");
                            break;
                        }
                    }
                    None => {
                        prehello_bytes += data.len();
                        if prehello_bytes > PREHELLO_BUFFER_LIMIT {
                            prehello_buffer.clear();
                            if !prehello_overflowed {
                                prehello_overflowed = true;
                                send_error(
                                    &message_tx,
                                    ErrorCode::Protocol,
                                    "audio received before hello was discarded",
                                )
                                .await;
                            }
                        } else {
                            prehello_buffer.push(data);
                        }
                    }
                }
            }
            Message::Text(text) => {
                stats.text_messages_received.fetch_add(1, Ordering::Relaxed);
                let incoming: IncomingMessage = match serde_json::from_str(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("malformed control frame: {e}");
                        send_error(
                            &message_tx,
                            ErrorCode::Protocol,
                            format!("invalid message format: {e}"),
                        )
                        .await;
                        continue;
                    }
                };

                match incoming {
                    IncomingMessage::Hello {
                        sample_rate,
                        session_id,
                    } => {
                        if active.is_some() {
                            send_error(&message_tx, ErrorCode::Protocol, "hello already received")
                                .await;
                            continue;
                        }
                        if sample_rate != SAMPLE_RATE {
                            send_error(
                                &message_tx,
                                ErrorCode::Protocol,
                                format!(
                                    "unsupported sample rate {sample_rate}, expected {SAMPLE_RATE}"
                                ),
                            )
                            .await;
                            continue;
                        }
                        let activated = activate_session(
                            &app,
                            Arc::clone(&shared),
                            message_tx.clone(),
                            session_cancel.clone(),
                            session_id,
                        )
                        .await;
                        // Replay audio that arrived while the hello was in flight.
                        for chunk in prehello_buffer.drain(..) {
                            let _ = activated.audio_tx.send(chunk).await;
                        }
                        prehello_bytes = 0;
                        active = Some(activated);
                    }
                    IncomingMessage::Interrupt => match &active {
                        Some(active) => active.session.interrupt(&message_tx).await,
                        None => {
                            send_error(
                                &message_tx,
                                ErrorCode::Protocol,
                                "hello must be the first message",
                            )
                            .await;
                        }
                    },
                    IncomingMessage::LoadSession { session_id } => match &active {
                        Some(active) => {
                            handle_load_session(&app, active, &message_tx, &session_id).await;
                        }
                        None => {
                            send_error(
                                &message_tx,
                                ErrorCode::Protocol,
                                "hello must be the first message",
                            )
                            .await;
                        }
                    },
                    IncomingMessage::TextInput { text } => match &active {
                        Some(active) => {
                            if text.trim().is_empty() {
                                continue;
                            }
                            // Echo the text back as its transcription, then run
                            // the normal pipeline.
                            if active.turn_tx.send(TurnInput::Text(text)).await.is_err() {
                                warn!("turn driver gone, dropping connection");
                                break;
                            }
                        }
                        None => {
                            send_error(
                                &message_tx,
                                ErrorCode::Protocol,
                                "hello must be the first message",
                            )
                            .await;
                        }
                    },
                }
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Handled by axum.
            }
            Message::Close(_) => {
                info!("close frame received");
                break;
            }
        }
    }

    // Teardown: stop the in-flight turn, let the driver wind down, persist.
    session_cancel.cancel();
    if let Some(active) = active.take() {
        if let Some(handle) = active.session.current_turn.lock().await.take() {
            handle.cancel.cancel();
        }
        drop(active.audio_tx);
        drop(active.turn_tx);
        active.segmenter_task.abort();
        if tokio::time::timeout(Duration::from_secs(2), active.driver_task)
            .await
            .is_err()
        {
            warn!("turn driver did not stop in time");
        }
        // A reply cut off by the disconnect is recorded like an interrupted
        // one, so the saved history reflects what the user heard.
        active.session.dialog.lock().await.rewind_on_interrupt();
        if let Err(e) = active.session.persist(&app.store).await {
            warn!(session = %active.session.id, "final session save failed: {e}");
        }
        info!(
            session = %active.session.id,
            stats = %stats.summary(),
            "session closed"
        );
    } else {
        info!(stats = %stats.summary(), "connection closed before hello");
    }
    sender_task.abort();
    app.session_closed();
}

/// Build the session and spin up its segmenter and turn driver.
async fn activate_session(
    app: &Arc<AppState>,
    shared: Arc<SessionShared>,
    message_tx: mpsc::Sender<MessageRoute>,
    session_cancel: CancellationToken,
    requested_id: Option<String>,
) -> ActiveSession {
    let (id, restored) = match requested_id {
        Some(id) if is_valid_session_id(&id) => {
            let record = app.store.load(&id).await;
            (id, record)
        }
        Some(bad) => {
            warn!(id = %bad, "ignoring malformed session id in hello");
            send_error(&message_tx, ErrorCode::Protocol, "invalid session id").await;
            (fresh_session_id(), None)
        }
        None => (fresh_session_id(), None),
    };

    let mut dialog = DialogEngine::new(app.config.dialog.clone());
    if let Some(record) = &restored {
        dialog.restore(record.turns.clone());
    }
    let session = Arc::new(Session::new(id, dialog, shared));
    info!(
        session = %session.id,
        restored_turns = restored.map(|r| r.turns.len()).unwrap_or(0),
        "session active"
    );

    let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(100);
    let (turn_tx, turn_rx) = mpsc::channel::<TurnInput>(8);

    let segmenter_task = tokio::spawn(run_segmenter(
        app.config.segmenter.clone(),
        session.id.clone(),
        audio_rx,
        turn_tx.clone(),
    ));
    let driver_task = tokio::spawn(run_turn_driver(
        Arc::clone(&session),
        Arc::clone(app),
        message_tx,
        turn_rx,
        session_cancel,
    ));

    ActiveSession {
        session,
        audio_tx,
        turn_tx,
        segmenter_task,
        driver_task,
    }
}

/// Mid-connection history load. Deferred behind the current turn: the client
/// gets a `busy` error and may retry once the turn ends.
async fn handle_load_session(
    app: &Arc<AppState>,
    active: &ActiveSession,
    message_tx: &mpsc::Sender<MessageRoute>,
    session_id: &str,
) {
    if active.session.turn_active().await {
        send_error(message_tx, ErrorCode::Busy, "a turn is in progress, retry later").await;
        return;
    }
    if !is_valid_session_id(session_id) {
        send_error(message_tx, ErrorCode::Protocol, "invalid session id").await;
        return;
    }
    match app.store.load(session_id).await {
        Some(record) => {
            let turns = record.turns.len();
            active.session.dialog.lock().await.restore(record.turns);
            info!(
                session = %active.session.id,
                loaded = %session_id,
                turns,
                "history loaded"
            );
        }
        None => {
            send_error(
                message_tx,
                ErrorCode::Protocol,
                format!("session {session_id} not found"),
            )
            .await;
        }
    }
}

/// Segmenter feed: reframe raw chunks, run VAD segmentation, queue utterances
/// for the turn driver.
async fn run_segmenter(
    config: SegmenterConfig,
    session_id: String,
    mut audio_rx: mpsc::Receiver<Bytes>,
    turn_tx: mpsc::Sender<TurnInput>,
) {
    let mut reassembler = FrameReassembler::new();
    let mut segmenter = UtteranceSegmenter::new(config);
    let gate = RateGate::new(Duration::from_secs(5));
    let mut chunk_count = 0u64;

    while let Some(chunk) = audio_rx.recv().await {
        chunk_count += 1;
        for frame in reassembler.push(&chunk) {
            if let Some(utterance) = segmenter.push_frame(frame) {
                info!(
                    session = %session_id,
                    utterance = utterance.id,
                    secs = utterance.duration_secs(),
                    "utterance segmented"
                );
                if turn_tx
                    .send(TurnInput::Utterance(utterance))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
        if chunk_count % 50 == 0 && gate.check("audio_status") {
            debug!(
                session = %session_id,
                chunks = chunk_count,
                state = segmenter.state_label(),
                buffered_frames = segmenter.active_frames(),
                "audio status"
            );
        }
    }
    debug!(session = %session_id, "segmenter feed closed");
}

fn fresh_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

async fn send_error(
    message_tx: &mpsc::Sender<MessageRoute>,
    code: ErrorCode,
    message: impl Into<String>,
) {
    let _ = message_tx
        .send(MessageRoute::Outgoing(OutgoingMessage::error(code, message)))
        .await;
}
