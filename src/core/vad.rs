//! Energy-based voice activity scoring.
//!
//! Produces a per-frame speech probability in [0, 1] by normalizing RMS
//! energy against a reference level. The segmenter compares the score to its
//! threshold; the scorer itself is stateless.

use crate::core::audio::rms;

/// Full-scale RMS that maps to a score of 1.0. An RMS of ~0.3 is very loud
/// speech on a normalized mic signal.
pub const DEFAULT_REFERENCE_RMS: f32 = 0.30;

/// Stateless per-frame speech scorer.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    reference_rms: f32,
}

impl EnergyVad {
    pub fn new(reference_rms: f32) -> Self {
        Self {
            reference_rms: reference_rms.max(f32::EPSILON),
        }
    }

    /// Speech probability for one frame of samples.
    pub fn score(&self, samples: &[f32]) -> f32 {
        (rms(samples) / self.reference_rms).clamp(0.0, 1.0)
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_RMS)
    }
}
