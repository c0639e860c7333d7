//! Heartbeat interval backoff.
//!
//! Sessions start with a short heartbeat delay that grows in proportion to
//! how long the session has been active, up to a fixed ceiling. Delays are
//! rounded down to whole [`HEARTBEAT_STEP`]s, so the schedule is a
//! non-decreasing staircase.

use std::time::Duration;
use tokio::time::Instant;

/// Delay grows by this fraction of the elapsed session time (3/10).
pub const BACKOFF_NUMERATOR: u128 = 3;
pub const BACKOFF_DENOMINATOR: u128 = 10;
/// Added to the elapsed time so a fresh session starts at 10.5 s.
pub const OFFSET_MATCHING_BASE_INTERVAL: Duration = Duration::from_secs(35);
pub const MAX_TIME_BETWEEN_HEARTBEATS: Duration = Duration::from_secs(15 * 60);
pub const HEARTBEAT_STEP: Duration = Duration::from_millis(500);

/// Decides how long to wait before the next heartbeat of a session.
pub trait IntervalCalculator: Send + Sync {
    fn calculate(&self, started_at: Instant) -> Duration;
}

/// Proportional backoff anchored to the session start.
#[derive(Debug, Default, Clone, Copy)]
pub struct BackoffIntervalCalculator;

impl BackoffIntervalCalculator {
    /// Delay for a session that has been active for `elapsed`.
    pub fn interval_for(elapsed: Duration) -> Duration {
        let with_offset = elapsed.saturating_add(OFFSET_MATCHING_BASE_INTERVAL).as_millis();
        let scaled = with_offset * BACKOFF_NUMERATOR / BACKOFF_DENOMINATOR;
        let capped = scaled.min(MAX_TIME_BETWEEN_HEARTBEATS.as_millis());
        let step = HEARTBEAT_STEP.as_millis();
        Duration::from_millis(((capped / step) * step) as u64)
    }

    /// Delay for a session started at `started_at`, sampled at `now`.
    pub fn calculate_at(started_at: Instant, now: Instant) -> Duration {
        Self::interval_for(now.saturating_duration_since(started_at))
    }
}

impl IntervalCalculator for BackoffIntervalCalculator {
    fn calculate(&self, started_at: Instant) -> Duration {
        Self::calculate_at(started_at, Instant::now())
    }
}

/// Always returns the same delay.
#[derive(Debug, Clone, Copy)]
pub struct FixedIntervalCalculator(pub Duration);

impl IntervalCalculator for FixedIntervalCalculator {
    fn calculate(&self, _started_at: Instant) -> Duration {
        self.0
    }
}
