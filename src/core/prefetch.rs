//! TTS prefetch: synthesize ahead of playback, deliver strictly in order.
//!
//! A producer task consumes sentences from the splitter and synthesizes them
//! one at a time (the per-session synthesis cap), handing each sentence's
//! audio over a oneshot. Chunk handles travel through a channel bounded at
//! the prefetch depth, so synthesis can run at most `depth` sentences ahead
//! of delivery. The consumer pops handles in splitter order and waits on
//! each handle's audio, which preserves ordering even when a future
//! synthesizer completes work out of order.
//!
//! Cancellation: the turn's token stops the producer and abandons in-flight
//! synthesis; an abandoned oneshot surfaces to the consumer as a closed
//! channel, never as stale audio.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::tts::{Synthesizer, TtsResult};

/// Sentences pre-synthesized ahead of playback.
pub const DEFAULT_PREFETCH_DEPTH: usize = 2;

/// One sentence travelling through the prefetch queue.
pub struct SentenceChunk {
    pub index: usize,
    pub text: String,
    /// Interrupt generation this chunk belongs to.
    pub generation: u64,
    audio_rx: oneshot::Receiver<TtsResult<Bytes>>,
}

impl SentenceChunk {
    /// Wait for this chunk's audio. `None` means synthesis was abandoned by
    /// an interrupt.
    pub async fn audio(self) -> Option<TtsResult<Bytes>> {
        self.audio_rx.await.ok()
    }
}

/// Spawn the prefetch producer for one turn.
///
/// Returns the ordered stream of chunk handles. The producer ends when the
/// sentence stream closes or the token cancels.
pub fn spawn_prefetch(
    synthesizer: Arc<dyn Synthesizer>,
    depth: usize,
    generation: u64,
    cancel: CancellationToken,
    mut sentence_rx: mpsc::Receiver<String>,
) -> mpsc::Receiver<SentenceChunk> {
    let (chunk_tx, chunk_rx) = mpsc::channel(depth.max(1));

    tokio::spawn(async move {
        let mut index = 0usize;
        loop {
            let sentence = tokio::select! {
                _ = cancel.cancelled() => break,
                next = sentence_rx.recv() => match next {
                    Some(sentence) => sentence,
                    None => break,
                },
            };

            let (audio_tx, audio_rx) = oneshot::channel();
            let chunk = SentenceChunk {
                index,
                text: sentence.clone(),
                generation,
                audio_rx,
            };

            // The bounded send enforces the prefetch depth: once `depth`
            // chunks are queued undelivered, scheduling stalls here.
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = chunk_tx.send(chunk) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            // One synthesis in flight per session; abandoning it on
            // cancellation drops audio_tx, which the consumer observes.
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = synthesizer.synthesize(&sentence) => result,
            };
            let _ = audio_tx.send(result);
            index += 1;
        }
        debug!(sentences = index, "prefetch producer finished");
    });

    chunk_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::TtsError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Synthesizer whose per-call latency is scripted by sentence index.
    struct ScriptedSynth {
        delays: Vec<Duration>,
        calls: Mutex<usize>,
        fail_on: Option<usize>,
    }

    impl ScriptedSynth {
        fn new(delays: Vec<Duration>) -> Self {
            Self {
                delays,
                calls: Mutex::new(0),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynth {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn sample_rate(&self) -> u32 {
            22_050
        }

        async fn synthesize(&self, text: &str) -> TtsResult<Bytes> {
            let call = {
                let mut calls = self.calls.lock().expect("lock");
                let n = *calls;
                *calls += 1;
                n
            };
            if let Some(delay) = self.delays.get(call) {
                tokio::time::sleep(*delay).await;
            }
            if self.fail_on == Some(call) {
                return Err(TtsError::Synthesis("scripted failure".into()));
            }
            Ok(Bytes::from(format!("audio:{text}")))
        }
    }

    async fn send_sentences(tx: mpsc::Sender<String>, sentences: &[&str]) {
        for s in sentences {
            tx.send(s.to_string()).await.expect("send sentence");
        }
    }

    #[tokio::test]
    async fn chunks_arrive_in_sentence_order() {
        let synth = Arc::new(ScriptedSynth::new(vec![
            Duration::from_millis(5),
            Duration::from_millis(50), // middle sentence is slow
            Duration::from_millis(5),
        ]));
        let (tx, rx) = mpsc::channel(8);
        let mut chunks = spawn_prefetch(synth, 2, 1, CancellationToken::new(), rx);

        send_sentences(tx.clone(), &["First one.", "Second one.", "Third one."]).await;
        drop(tx);

        let mut seen = Vec::new();
        while let Some(chunk) = chunks.recv().await {
            let index = chunk.index;
            let audio = chunk.audio().await.expect("not cancelled").expect("ok");
            seen.push((index, audio));
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].0, 0);
        assert_eq!(seen[1].0, 1);
        assert_eq!(seen[2].0, 2);
        assert_eq!(&seen[1].1[..], b"audio:Second one.");
    }

    #[tokio::test]
    async fn generation_is_stamped_on_every_chunk() {
        let synth = Arc::new(ScriptedSynth::new(vec![]));
        let (tx, rx) = mpsc::channel(8);
        let mut chunks = spawn_prefetch(synth, 2, 7, CancellationToken::new(), rx);
        send_sentences(tx.clone(), &["A sentence."]).await;
        drop(tx);

        let chunk = chunks.recv().await.expect("one chunk");
        assert_eq!(chunk.generation, 7);
    }

    #[tokio::test]
    async fn failed_sentence_surfaces_error_but_later_ones_continue() {
        let mut synth = ScriptedSynth::new(vec![]);
        synth.fail_on = Some(0);
        let synth = Arc::new(synth);
        let (tx, rx) = mpsc::channel(8);
        let mut chunks = spawn_prefetch(synth, 2, 1, CancellationToken::new(), rx);
        send_sentences(tx.clone(), &["Bad sentence.", "Good sentence."]).await;
        drop(tx);

        let first = chunks.recv().await.expect("chunk 0");
        assert!(first.audio().await.expect("resolved").is_err());
        let second = chunks.recv().await.expect("chunk 1");
        assert!(second.audio().await.expect("resolved").is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_the_producer() {
        let synth = Arc::new(ScriptedSynth::new(vec![Duration::from_secs(60)]));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        let mut chunks = spawn_prefetch(synth, 2, 1, cancel.clone(), rx);
        send_sentences(tx.clone(), &["Never finishes."]).await;

        let chunk = chunks.recv().await.expect("handle arrives before audio");
        cancel.cancel();

        // Abandoned synthesis resolves to None, not stale audio.
        assert!(chunk.audio().await.is_none());
        // Producer has exited: the channel drains to closed.
        assert!(chunks.recv().await.is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn depth_bounds_scheduling_ahead_of_delivery() {
        // All synthesis instant; consumer never polls. With depth 2 the
        // producer can complete at most depth sentences beyond the one whose
        // handle is stuck in the full channel.
        let synth = Arc::new(ScriptedSynth::new(vec![]));
        let (tx, rx) = mpsc::channel(8);
        let counter_view = Arc::clone(&synth);
        let _chunks = spawn_prefetch(synth, 2, 1, CancellationToken::new(), rx);

        send_sentences(
            tx.clone(),
            &["One.", "Two.", "Three.", "Four.", "Five.", "Six."],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let calls = *counter_view.calls.lock().expect("lock");
        assert!(
            calls <= 3,
            "producer ran {calls} syntheses with nothing consumed"
        );
    }
}
