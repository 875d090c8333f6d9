//! One conversational turn: utterance → transcript → streamed reply →
//! sentence-by-sentence TTS → egress.
//!
//! The turn driver runs turns strictly one at a time per session. Inside a
//! turn, three concurrent pieces cooperate: the LLM stream (driven here), a
//! relay that feeds deltas into the dialog buffer and the sentence splitter,
//! and an egress consumer that delivers prefetched audio in order. All of
//! them check the turn's cancellation token at suspension points and stamp
//! output with the interrupt generation captured at turn start.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::dialog::DialogEngine;
use crate::core::llm::LlmError;
use crate::core::prefetch::{SentenceChunk, spawn_prefetch};
use crate::core::segmenter::Utterance;
use crate::core::splitter::SentenceSplitter;
use crate::handlers::ws::messages::{ErrorCode, MessageRoute, OutgoingMessage};
use crate::handlers::ws::session::{Session, SessionShared, TurnHandle};
use crate::state::AppState;
use crate::utils::timing::TurnTimings;

/// What starts a turn.
pub enum TurnInput {
    Utterance(Utterance),
    /// Direct text input bypassing STT.
    Text(String),
}

/// How a turn ended, as seen by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// Nothing to do: empty transcription or empty reply.
    Skipped,
    Cancelled,
    Failed,
    /// The backend is permanently dead; the session must close.
    BackendDead,
}

/// Everything one turn needs.
pub struct TurnContext {
    pub session: Arc<Session>,
    pub app: Arc<AppState>,
    pub message_tx: mpsc::Sender<MessageRoute>,
    pub generation: u64,
    pub cancel: CancellationToken,
}

/// Consume turn inputs one at a time until the channel closes or the
/// connection is torn down. No new turn begins until the previous one has
/// completed or been interrupted and drained.
pub async fn run_turn_driver(
    session: Arc<Session>,
    app: Arc<AppState>,
    message_tx: mpsc::Sender<MessageRoute>,
    mut turn_rx: mpsc::Receiver<TurnInput>,
    session_cancel: CancellationToken,
) {
    loop {
        let input = tokio::select! {
            _ = session_cancel.cancelled() => break,
            input = turn_rx.recv() => match input {
                Some(input) => input,
                None => break,
            },
        };

        session.shared.reset_turn_flags();
        let generation = session.shared.current_generation();
        let cancel = CancellationToken::new();
        *session.current_turn.lock().await = Some(TurnHandle {
            generation,
            cancel: cancel.clone(),
        });

        let ctx = TurnContext {
            session: Arc::clone(&session),
            app: Arc::clone(&app),
            message_tx: message_tx.clone(),
            generation,
            cancel,
        };
        let outcome = run_turn(ctx, input).await;
        let _ = session.current_turn.lock().await.take();
        // The flag must only reflect the turn in flight: an interrupt
        // arriving while the driver is idle would otherwise read the
        // finished turn's tts_started and emit a spurious tts_stop.
        session.shared.reset_turn_flags();

        if outcome == TurnOutcome::BackendDead {
            session_cancel.cancel();
            break;
        }
    }
    debug!(session = %session.id, "turn driver exited");
}

/// Execute one turn end to end.
pub async fn run_turn(ctx: TurnContext, input: TurnInput) -> TurnOutcome {
    let session_id = ctx.session.id.clone();
    let mut timings = TurnTimings::new();

    // Stage 1: speech to text.
    let transcript = match input {
        TurnInput::Text(text) => text.trim().to_string(),
        TurnInput::Utterance(utterance) => {
            debug!(
                session = %session_id,
                utterance = utterance.id,
                secs = utterance.duration_secs(),
                "transcribing utterance"
            );
            let result = timings
                .measure("transcribe", async {
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => None,
                        result = ctx.app.transcriber.transcribe(&utterance.samples) => Some(result),
                    }
                })
                .await;
            match result {
                None => return TurnOutcome::Cancelled,
                Some(Ok(text)) => text,
                Some(Err(e)) => {
                    warn!(session = %session_id, "transcription failed: {e}");
                    send_error(&ctx.message_tx, ErrorCode::SttFailed, e.to_string()).await;
                    return TurnOutcome::Failed;
                }
            }
        }
    };

    // Zero-length transcription: no user turn, no LLM call, no audio.
    if transcript.is_empty() {
        info!(session = %session_id, "empty transcription, skipping turn");
        return TurnOutcome::Skipped;
    }

    info!(session = %session_id, transcript = %transcript, "user turn");
    let _ = ctx
        .message_tx
        .send(MessageRoute::Outgoing(OutgoingMessage::Transcription {
            text: transcript.clone(),
        }))
        .await;

    // Stage 2: dialog update and reply stream.
    let messages = {
        let mut dialog = ctx.session.dialog.lock().await;
        dialog.append_user(&transcript);
        dialog.messages()
    };

    let (delta_tx, delta_rx) = mpsc::channel::<String>(64);
    let (sentence_tx, sentence_rx) = mpsc::channel::<String>(8);
    let chunk_rx = spawn_prefetch(
        Arc::clone(&ctx.app.synthesizer),
        ctx.app.config.prefetch_depth,
        ctx.generation,
        ctx.cancel.clone(),
        sentence_rx,
    );

    let relay = tokio::spawn(relay_deltas(
        Arc::clone(&ctx.session.dialog),
        delta_rx,
        sentence_tx,
    ));
    let egress = tokio::spawn(deliver_chunks(
        Arc::clone(&ctx.session.shared),
        ctx.message_tx.clone(),
        ctx.cancel.clone(),
        chunk_rx,
        ctx.app.synthesizer.sample_rate(),
    ));

    let stream_result = timings
        .measure(
            "llm",
            ctx.app.llm.stream_chat(&messages, &ctx.cancel, delta_tx),
        )
        .await;

    // The delta sender is gone; the relay flushes the splitter and the
    // prefetch pipeline drains to completion (or aborts on cancellation).
    let _ = relay.await;
    let sentences_delivered = timings.measure("tts", egress).await.unwrap_or(0);

    let outcome = match stream_result {
        Ok(_) => {
            if ctx.cancel.is_cancelled()
                || ctx.session.shared.current_generation() != ctx.generation
            {
                // Interrupt raced stream completion; the controller already
                // rewound the dialog. Discard the stale result.
                TurnOutcome::Cancelled
            } else {
                let reply = ctx.session.dialog.lock().await.finalize_reply();
                if reply.trim().is_empty() {
                    info!(session = %session_id, "empty reply, nothing to speak");
                    TurnOutcome::Skipped
                } else {
                    let _ = ctx
                        .message_tx
                        .send(MessageRoute::Outgoing(OutgoingMessage::LlmResponse {
                            text: reply,
                        }))
                        .await;
                    if let Err(e) = ctx.session.persist(&ctx.app.store).await {
                        warn!(session = %session_id, "failed to persist session: {e}");
                    }
                    TurnOutcome::Completed
                }
            }
        }
        Err(LlmError::Cancelled) => TurnOutcome::Cancelled,
        Err(LlmError::BackendUnavailable) => {
            warn!(session = %session_id, "backend permanently dead, closing session");
            ctx.session.dialog.lock().await.rewind_on_interrupt();
            send_error(
                &ctx.message_tx,
                ErrorCode::BackendUnavailable,
                "language model backend is unavailable",
            )
            .await;
            TurnOutcome::BackendDead
        }
        Err(e) => {
            warn!(session = %session_id, "reply stream failed: {e}");
            // Keep the history consistent with what the user heard.
            ctx.session.dialog.lock().await.rewind_on_interrupt();
            send_error(&ctx.message_tx, ErrorCode::BackendTransient, e.to_string()).await;
            TurnOutcome::Failed
        }
    };

    info!(
        session = %session_id,
        ?outcome,
        sentences = sentences_delivered,
        timings = %timings.summary(),
        "turn finished"
    );
    outcome
}

/// Feed streamed deltas into the dialog's pending buffer and the sentence
/// splitter; forward complete sentences to the prefetcher.
async fn relay_deltas(
    dialog: Arc<Mutex<DialogEngine>>,
    mut delta_rx: mpsc::Receiver<String>,
    sentence_tx: mpsc::Sender<String>,
) {
    let mut splitter = SentenceSplitter::new();
    while let Some(delta) = delta_rx.recv().await {
        dialog.lock().await.push_delta(&delta);
        for sentence in splitter.push(&delta) {
            if sentence_tx.send(sentence).await.is_err() {
                return;
            }
        }
    }
    if let Some(rest) = splitter.flush() {
        let _ = sentence_tx.send(rest).await;
    }
}

/// Deliver prefetched audio to the client in sentence order.
///
/// `tts_start` goes out before the first audio byte, `tts_stop` after the
/// last (the interrupt path emits its own `tts_stop`). A sentence whose
/// synthesis failed is surfaced as an error frame and skipped; the rest of
/// the turn continues.
async fn deliver_chunks(
    shared: Arc<SessionShared>,
    message_tx: mpsc::Sender<MessageRoute>,
    cancel: CancellationToken,
    mut chunk_rx: mpsc::Receiver<SentenceChunk>,
    sample_rate: u32,
) -> usize {
    let mut delivered = 0usize;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let index = chunk.index;
        let generation = chunk.generation;
        let audio = tokio::select! {
            _ = cancel.cancelled() => break,
            audio = chunk.audio() => audio,
        };

        match audio {
            // Synthesis abandoned by an interrupt.
            None => break,
            Some(Err(e)) => {
                warn!(sentence = index, "sentence synthesis failed: {e}");
                send_error(
                    &message_tx,
                    ErrorCode::TtsFailed,
                    format!("sentence {index} failed: {e}"),
                )
                .await;
            }
            Some(Ok(data)) if data.is_empty() => {}
            Some(Ok(data)) => {
                if shared.mark_tts_started()
                    && message_tx
                        .send(MessageRoute::Outgoing(OutgoingMessage::TtsStart {
                            sample_rate,
                        }))
                        .await
                        .is_err()
                {
                    break;
                }
                if message_tx
                    .send(MessageRoute::Audio { data, generation })
                    .await
                    .is_err()
                {
                    break;
                }
                delivered += 1;
            }
        }
    }

    if !cancel.is_cancelled() && shared.tts_started() {
        let _ = message_tx
            .send(MessageRoute::Outgoing(OutgoingMessage::TtsStop))
            .await;
    }
    delivered
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
