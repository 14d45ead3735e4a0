//! Progress accounting and event throttling.

use std::time::Duration;

use tokio::time::Instant;

use super::{SessionProgress, SessionState};

/// Share of the overall percentage owned by each phase.
fn phase_range(state: SessionState) -> (u8, u8) {
    match state {
        SessionState::Idle | SessionState::Recovering => (0, 0),
        SessionState::Preparing => (0, 5),
        SessionState::Exporting => (5, 25),
        SessionState::Transferring => (25, 40),
        SessionState::Importing => (40, 90),
        SessionState::Verifying => (90, 100),
        SessionState::Completed => (100, 100),
        // Terminal failures keep whatever was reached.
        SessionState::Failed | SessionState::Cancelled => (0, 0),
    }
}

/// One progress update and whether it should be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub progress: SessionProgress,
    pub emit: bool,
}

/// Keeps the percentage monotonic and publishes at most one event per
/// `min_interval`.
#[derive(Debug)]
pub struct ProgressTracker {
    min_interval: Duration,
    last_emit: Option<Instant>,
    percentage: u8,
}

impl ProgressTracker {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_emit: None,
            percentage: 0,
        }
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    fn compute(&mut self, state: SessionState, processed: usize, total: usize) -> SessionProgress {
        let (lo, hi) = phase_range(state);
        let span = usize::from(hi - lo);
        let within = if total == 0 {
            span
        } else {
            span * processed.min(total) / total
        };
        let reached = lo.saturating_add(u8::try_from(within).unwrap_or(hi - lo));
        self.percentage = self.percentage.max(reached).min(100);

        SessionProgress {
            percentage: self.percentage,
            processed_count: processed,
            total_count: total,
        }
    }

    /// Record progress; `emit` is set when the throttle window has passed.
    pub fn update(&mut self, state: SessionState, processed: usize, total: usize) -> ProgressUpdate {
        let progress = self.compute(state, processed, total);
        let now = Instant::now();
        let emit = self
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= self.min_interval);
        if emit {
            self.last_emit = Some(now);
        }
        ProgressUpdate { progress, emit }
    }

    /// Record progress and publish regardless of the throttle.
    pub fn force(&mut self, state: SessionState, processed: usize, total: usize) -> SessionProgress {
        let progress = self.compute(state, processed, total);
        self.last_emit = Some(Instant::now());
        progress
    }
}
