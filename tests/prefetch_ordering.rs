//! End-to-end ordering of the splitter → prefetch → delivery chain.
//!
//! The backend's token stream forms three sentences and the middle one is
//! artificially slow to synthesize; the client must still receive audio for
//! sentence 1, then 2, then 3.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use colloquy::core::prefetch::spawn_prefetch;
use colloquy::core::splitter::SentenceSplitter;
use colloquy::core::tts::{Synthesizer, TtsResult};

/// Synthesizer that sleeps per scripted sentence prefix.
struct SlowMiddleSynth {
    calls: AtomicUsize,
}

#[async_trait]
impl Synthesizer for SlowMiddleSynth {
    fn name(&self) -> &'static str {
        "slow-middle"
    }

    fn sample_rate(&self) -> u32 {
        22_050
    }

    async fn synthesize(&self, text: &str) -> TtsResult<Bytes> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 1 {
            tokio::time::sleep(Duration::from_millis(150)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(Bytes::from(format!("pcm[{text}]")))
    }
}

#[tokio::test]
async fn sentences_are_delivered_in_splitter_order() {
    let deltas = [
        "The first sentence",
        " arrives quickly. The second sentence",
        " is rather slow to render. The third",
        " sentence wraps things up.",
    ];

    // Splitter chunks the token stream into speakable sentences.
    let mut splitter = SentenceSplitter::new();
    let (sentence_tx, sentence_rx) = mpsc::channel(8);
    let synth = Arc::new(SlowMiddleSynth {
        calls: AtomicUsize::new(0),
    });
    let mut chunks = spawn_prefetch(synth, 2, 1, CancellationToken::new(), sentence_rx);

    for delta in deltas {
        for sentence in splitter.push(delta) {
            sentence_tx.send(sentence).await.expect("send sentence");
        }
    }
    if let Some(rest) = splitter.flush() {
        sentence_tx.send(rest).await.expect("send final sentence");
    }
    drop(sentence_tx);

    let mut received = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        let index = chunk.index;
        let text = chunk.text.clone();
        let audio = chunk
            .audio()
            .await
            .expect("synthesis not cancelled")
            .expect("synthesis succeeds");
        received.push((index, text, audio));
    }

    assert_eq!(received.len(), 3, "three sentences expected");
    // Indexes strictly ascending: 1, 2, 3 — never 1, 3, 2.
    assert_eq!(received[0].0, 0);
    assert_eq!(received[1].0, 1);
    assert_eq!(received[2].0, 2);
    assert_eq!(received[0].1, "The first sentence arrives quickly.");
    assert_eq!(received[1].1, "The second sentence is rather slow to render.");
    assert_eq!(received[2].1, "The third sentence wraps things up.");
    // Audio payloads match their sentences.
    assert_eq!(
        &received[1].2[..],
        b"pcm[The second sentence is rather slow to render.]"
    );
}

#[tokio::test]
async fn interrupt_mid_stream_drops_remaining_sentences() {
    let synth = Arc::new(SlowMiddleSynth {
        calls: AtomicUsize::new(1), // every call takes the slow path's sibling timing
    });
    let cancel = CancellationToken::new();
    let (sentence_tx, sentence_rx) = mpsc::channel(8);
    let mut chunks = spawn_prefetch(synth, 2, 3, cancel.clone(), sentence_rx);

    sentence_tx
        .send("A sentence that will be cut off.".to_string())
        .await
        .expect("send");

    let chunk = chunks.recv().await.expect("handle arrives");
    cancel.cancel();

    // The in-flight synthesis resolves to abandoned, not to stale audio.
    assert!(chunk.audio().await.is_none());
    assert!(chunks.recv().await.is_none(), "producer stops after cancel");
}
