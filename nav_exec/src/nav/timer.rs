//! Accumulated timings of pipeline stages

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::BTreeMap;
use std::time::Instant;

use util::time::std_duration_to_seconds;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Lap timer which accumulates the time since the last lap under a named stage.
pub struct TaskTimer {
    timings: BTreeMap<String, f64>,
    last: Instant,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TaskTimer {
    pub fn new() -> Self {
        Self {
            timings: BTreeMap::new(),
            last: Instant::now(),
        }
    }

    /// Start a new lap without accounting the time since the last one.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Add the time since the last lap to `stage` and start a new lap.
    ///
    /// Returns the lap time in seconds.
    pub fn time(&mut self, stage: &str) -> f64 {
        let now = Instant::now();
        let lap = std_duration_to_seconds(now - self.last);
        self.last = now;

        *self.timings.entry(stage.to_string()).or_insert(0.0) += lap;

        lap
    }

    /// Total seconds spent in each stage.
    pub fn timings(&self) -> &BTreeMap<String, f64> {
        &self.timings
    }
}

impl Default for TaskTimer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
