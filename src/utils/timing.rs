//! Per-turn stage timing.
//!
//! Records how long each pipeline stage took so the turn summary line can
//! report transcribe/LLM/TTS latency without scattering `Instant` math
//! through the pipeline code.

use std::time::{Duration, Instant};

/// Durations recorded for one turn, in insertion order.
#[derive(Debug, Default)]
pub struct TurnTimings {
    entries: Vec<(&'static str, Duration)>,
}

impl TurnTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &'static str, elapsed: Duration) {
        self.entries.push((stage, elapsed));
    }

    /// Time a future and record its duration under `stage`.
    pub async fn measure<T, F>(&mut self, stage: &'static str, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        let out = fut.await;
        self.record(stage, start.elapsed());
        out
    }

    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }

    /// One-line summary like `transcribe=412ms llm=1.820s tts=233ms`.
    pub fn summary(&self) -> String {
        self.entries
            .iter()
            .map(|(stage, d)| format!("{stage}={}", format_duration(*d)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Format a duration with a unit appropriate to its magnitude.
pub fn format_duration(d: Duration) -> String {
    if d >= Duration::from_secs(1) {
        format!("{:.3}s", d.as_secs_f64())
    } else if d >= Duration::from_millis(1) {
        format!("{:.0}ms", d.as_secs_f64() * 1_000.0)
    } else {
        format!("{:.0}us", d.as_secs_f64() * 1_000_000.0)
    }
}
