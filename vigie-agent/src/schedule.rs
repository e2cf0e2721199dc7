//! Reporting cadence
//!
//! The agent loop is a periodic task: it runs one cycle, idles for the rest
//! of the interval, and stops as soon as its cancellation token fires, even
//! in the middle of a sampling window.

use std::time::Duration;

/// Timing of one reporting cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub report_interval: Duration,
    pub sampling_window: Duration,
}

impl Cadence {
    /// Idle time after a cycle. Sampling already consumed `sampling_window`,
    /// so POSTs stay `report_interval` apart; never negative.
    pub fn idle(&self) -> Duration {
        self.report_interval.saturating_sub(self.sampling_window)
    }
}
