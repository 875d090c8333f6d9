//! Rate-limited logging gate for hot paths.
//!
//! The audio ingress path sees a frame every 20 ms; logging each one would
//! drown everything else. The gate admits at most one log line per key per
//! interval.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Admits at most one event per key per interval.
///
/// Usage: `if gate.check("audio_status") { debug!(...); }`
pub struct RateGate {
    interval: Duration,
    last: Mutex<HashMap<&'static str, Instant>>,
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if enough time has passed since the last admitted event
    /// for this key, and records the admission.
    pub fn check(&self, key: &'static str) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().expect("rate gate lock poisoned");
        match last.get(key) {
            Some(prev) if now.duration_since(*prev) < self.interval => false,
            _ => {
                last.insert(key, now);
                true
            }
        }
    }
}
