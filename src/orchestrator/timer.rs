//! Randomized delays for scheduler re-arm and in-page actions.
//!
//! Every timer in the runtime samples a [`JitterRange`] so nothing fires on
//! a fixed cadence. Tests use zero-width ranges under a paused tokio clock
//! to make firing order deterministic.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusive millisecond range a delay is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl JitterRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Draw a delay uniformly from the range. A degenerate range
    /// (`min >= max`) always yields `min`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let ms = if self.min_ms >= self.max_ms {
            self.min_ms
        } else {
            rng.gen_range(self.min_ms..=self.max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Draw a delay with the thread-local generator.
    pub fn sample_thread(&self) -> Duration {
        self.sample(&mut rand::thread_rng())
    }
}

/// Sleep for a delay drawn from the range.
pub async fn sleep_jittered(range: JitterRange) {
    tokio::time::sleep(range.sample_thread()).await;
}
