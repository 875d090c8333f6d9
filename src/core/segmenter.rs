//! Utterance segmentation: fixed audio frames in, bounded utterances out.
//!
//! A two-state machine driven by per-frame VAD scores. Silence hysteresis
//! (N consecutive sub-threshold frames) closes an utterance; a preroll ring
//! prepends the frames just before speech onset so the STT hears the true
//! start of the word. Trailing silence stays in the utterance to help STT
//! end-pointing.

use std::collections::VecDeque;

use tracing::debug;

use crate::core::audio::AudioFrame;
use crate::core::vad::{DEFAULT_REFERENCE_RMS, EnergyVad};

/// Segmenter tuning. Frame counts are in 20 ms frames.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// VAD probability at or above which a frame counts as speech.
    pub speech_threshold: f32,
    /// Consecutive sub-threshold frames that close an utterance (~320 ms).
    pub silence_frames_required: usize,
    /// Utterances shorter than this are discarded (~0.5 s).
    pub min_utterance_frames: usize,
    /// Forced cut above this length (~10 s).
    pub max_utterance_frames: usize,
    /// Frames kept before speech onset.
    pub preroll_frames: usize,
    /// RMS level that maps to a VAD score of 1.0.
    pub reference_rms: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.45,
            silence_frames_required: 10,
            min_utterance_frames: 25,
            max_utterance_frames: 500,
            preroll_frames: 5,
            reference_rms: DEFAULT_REFERENCE_RMS,
        }
    }
}

/// One contiguous span of speech, preroll and trailing silence included.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: u64,
    pub samples: Vec<f32>,
}

impl Utterance {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / crate::core::audio::SAMPLE_RATE as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

/// Converts an unbounded frame stream into a lazy sequence of utterances.
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    vad: EnergyVad,
    state: State,
    preroll: VecDeque<AudioFrame>,
    active: Vec<f32>,
    active_frames: usize,
    silence_run: usize,
    next_utterance_id: u64,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let vad = EnergyVad::new(config.reference_rms);
        Self {
            config,
            vad,
            state: State::Idle,
            preroll: VecDeque::new(),
            active: Vec::new(),
            active_frames: 0,
            silence_run: 0,
            next_utterance_id: 0,
        }
    }

    /// Feed one frame; returns a complete utterance when a boundary closes.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let score = self.vad.score(&frame.samples);
        let is_speech = score >= self.config.speech_threshold;

        match self.state {
            State::Idle => {
                if is_speech {
                    debug!(score, seq = frame.seq, "speech start");
                    self.state = State::Speaking;
                    self.silence_run = 0;
                    self.active_frames = 0;
                    // Seed with the preroll ring so the onset is not clipped.
                    for preroll_frame in self.preroll.drain(..) {
                        self.active.extend_from_slice(&preroll_frame.samples);
                        self.active_frames += 1;
                    }
                    self.append_frame(frame);
                    None
                } else {
                    self.preroll.push_back(frame);
                    while self.preroll.len() > self.config.preroll_frames {
                        self.preroll.pop_front();
                    }
                    None
                }
            }
            State::Speaking => {
                self.append_frame(frame);

                if is_speech {
                    self.silence_run = 0;
                } else {
                    self.silence_run += 1;
                }

                if self.active_frames >= self.config.max_utterance_frames {
                    debug!(frames = self.active_frames, "max utterance length, forced cut");
                    return self.close_utterance(true);
                }

                if self.silence_run >= self.config.silence_frames_required {
                    debug!(
                        frames = self.active_frames,
                        silence_run = self.silence_run,
                        "silence boundary"
                    );
                    return self.close_utterance(false);
                }

                None
            }
        }
    }

    fn append_frame(&mut self, frame: AudioFrame) {
        self.active.extend_from_slice(&frame.samples);
        self.active_frames += 1;
    }

    /// Close the active utterance. Forced cuts always emit; silence
    /// boundaries emit only if the utterance reached the minimum length.
    fn close_utterance(&mut self, forced: bool) -> Option<Utterance> {
        let long_enough = self.active_frames >= self.config.min_utterance_frames;
        let samples = std::mem::take(&mut self.active);
        let frames = self.active_frames;
        self.active_frames = 0;
        self.silence_run = 0;
        self.state = State::Idle;

        if !forced && !long_enough {
            debug!(frames, "utterance below minimum length, discarding");
            return None;
        }

        let id = self.next_utterance_id;
        self.next_utterance_id += 1;
        Some(Utterance { id, samples })
    }

    /// Current FSM state for diagnostics.
    pub fn state_label(&self) -> &'static str {
        match self.state {
            State::Idle => "idle",
            State::Speaking => "speaking",
        }
    }

    /// Frames buffered in the active utterance.
    pub fn active_frames(&self) -> usize {
        self.active_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::FRAME_SAMPLES;

    fn frame(seq: u64, level: f32) -> AudioFrame {
        AudioFrame {
            samples: vec![level; FRAME_SAMPLES],
            seq,
        }
    }

    fn segmenter() -> UtteranceSegmenter {
        UtteranceSegmenter::new(SegmenterConfig {
            speech_threshold: 0.45,
            silence_frames_required: 10,
            min_utterance_frames: 25,
            max_utterance_frames: 500,
            preroll_frames: 5,
            reference_rms: 0.30,
        })
    }

    const SPEECH: f32 = 0.25; // score ~0.83
    const SILENCE: f32 = 0.01; // score ~0.03

    fn feed(seg: &mut UtteranceSegmenter, seq: &mut u64, level: f32, count: usize) -> Vec<Utterance> {
        let mut out = Vec::new();
        for _ in 0..count {
            if let Some(u) = seg.push_frame(frame(*seq, level)) {
                out.push(u);
            }
            *seq += 1;
        }
        out
    }

    #[test]
    fn speech_then_silence_emits_one_utterance() {
        let mut seg = segmenter();
        let mut seq = 0;
        // 60 frames of speech (1.2 s), then enough silence to close.
        assert!(feed(&mut seg, &mut seq, SPEECH, 60).is_empty());
        let emitted = feed(&mut seg, &mut seq, SILENCE, 10);
        assert_eq!(emitted.len(), 1);
        // Utterance carries speech plus trailing silence.
        assert_eq!(emitted[0].samples.len(), (60 + 10) * FRAME_SAMPLES);
        assert_eq!(emitted[0].id, 0);
    }

    #[test]
    fn silence_only_never_emits() {
        let mut seg = segmenter();
        let mut seq = 0;
        // 5 s of sub-threshold audio.
        assert!(feed(&mut seg, &mut seq, SILENCE, 250).is_empty());
        assert_eq!(seg.state_label(), "idle");
    }

    #[test]
    fn preroll_is_included_in_utterance() {
        let mut seg = segmenter();
        let mut seq = 0;
        // Plenty of leading silence fills the preroll ring.
        feed(&mut seg, &mut seq, SILENCE, 20);
        feed(&mut seg, &mut seq, SPEECH, 40);
        let emitted = feed(&mut seg, &mut seq, SILENCE, 10);
        assert_eq!(emitted.len(), 1);
        // 5 preroll + 40 speech + 10 trailing silence.
        assert_eq!(emitted[0].samples.len(), (5 + 40 + 10) * FRAME_SAMPLES);
        // First preroll frame is silence-level audio.
        assert!((emitted[0].samples[0] - SILENCE).abs() < 1e-6);
    }

    #[test]
    fn short_burst_is_discarded() {
        let mut seg = segmenter();
        let mut seq = 0;
        // 8 frames of speech (160 ms) is below the 25-frame minimum.
        feed(&mut seg, &mut seq, SPEECH, 8);
        let emitted = feed(&mut seg, &mut seq, SILENCE, 10);
        assert!(emitted.is_empty());
        assert_eq!(seg.state_label(), "idle");
        // Next real utterance still emits, with a fresh id of 0.
        feed(&mut seg, &mut seq, SPEECH, 40);
        let emitted = feed(&mut seg, &mut seq, SILENCE, 10);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].id, 0);
    }

    #[test]
    fn intermittent_silence_does_not_split() {
        let mut seg = segmenter();
        let mut seq = 0;
        feed(&mut seg, &mut seq, SPEECH, 30);
        // A 5-frame pause is below the 10-frame hysteresis.
        assert!(feed(&mut seg, &mut seq, SILENCE, 5).is_empty());
        feed(&mut seg, &mut seq, SPEECH, 30);
        let emitted = feed(&mut seg, &mut seq, SILENCE, 10);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].samples.len(), (30 + 5 + 30 + 10) * FRAME_SAMPLES);
    }

    #[test]
    fn max_length_forces_cut() {
        let mut seg = segmenter();
        let mut seq = 0;
        let emitted = feed(&mut seg, &mut seq, SPEECH, 500);
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].samples.len(), 500 * FRAME_SAMPLES);
        assert_eq!(seg.state_label(), "idle");
    }

    #[test]
    fn utterance_ids_are_monotonic() {
        let mut seg = segmenter();
        let mut seq = 0;
        feed(&mut seg, &mut seq, SPEECH, 30);
        let first = feed(&mut seg, &mut seq, SILENCE, 10);
        feed(&mut seg, &mut seq, SPEECH, 30);
        let second = feed(&mut seg, &mut seq, SILENCE, 10);
        assert_eq!(first[0].id, 0);
        assert_eq!(second[0].id, 1);
    }

    #[test]
    fn preroll_ring_stays_bounded_in_idle() {
        let mut seg = segmenter();
        let mut seq = 0;
        // A long stretch of noise must not grow memory beyond the ring.
        feed(&mut seg, &mut seq, SILENCE, 1000);
        assert_eq!(seg.active_frames(), 0);
        assert_eq!(seg.state_label(), "idle");
    }
}
