//! Settings consumed by [`StreamingSession`](super::StreamingSession).

use std::time::Duration;

use crate::wire::{DEFAULT_ORIGIN, REGISTER_TIMEOUT, SinkAddress};

/// Consecutive counted failures that disable the session.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Samples kept for the average frame rate.
pub const FPS_HISTORY_LEN: usize = 100;

// ── ExpectedFailurePolicy ────────────────────────────────────────

/// Whether DRM-protected and unsupported-operation capture failures
/// consume the consecutive-error budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedFailurePolicy {
    /// Log and record them, but leave the budget untouched.
    #[default]
    Ignore,
    /// Treat them like any other capture failure.
    Count,
}

// ── SessionTimings ───────────────────────────────────────────────

/// Delays used by the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Sleep between checks while paused.
    pub pause_poll: Duration,
    /// Wait after a failed registration.
    pub reconnect_delay: Duration,
    /// Wait after a failed cycle.
    pub error_backoff: Duration,
    /// How long `stop()` waits for the loop before aborting it.
    pub stop_timeout: Duration,
    /// Deadline for the sink's registration reply.
    pub register_timeout: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            pause_poll: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(2),
            error_backoff: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
            register_timeout: REGISTER_TIMEOUT,
        }
    }
}

// ── SessionConfig ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub sink: SinkAddress,
    /// Origin string sent at registration.
    pub origin: String,
    /// Capture width in pixels (even).
    pub width: u32,
    /// Capture height in pixels (even).
    pub height: u32,
    /// Frame-rate cap; 0 means as fast as the backend allows.
    pub max_fps: u32,
    pub expected_failures: ExpectedFailurePolicy,
    pub timings: SessionTimings,
    /// Emit a performance line every this many frames; 0 disables it.
    pub perf_log_every: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sink: SinkAddress::new("127.0.0.1", 19400),
            origin: DEFAULT_ORIGIN.to_string(),
            width: 160,
            height: 90,
            max_fps: 0,
            expected_failures: ExpectedFailurePolicy::default(),
            timings: SessionTimings::default(),
            perf_log_every: 300,
        }
    }
}

impl SessionConfig {
    /// Minimum time per frame when a cap is set.
    pub fn frame_interval(&self) -> Option<Duration> {
        (self.max_fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.max_fps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let t = SessionTimings::default();
        assert_eq!(t.pause_poll, Duration::from_millis(100));
        assert_eq!(t.stop_timeout, Duration::from_secs(5));
        assert_eq!(t.register_timeout, Duration::from_secs(5));
        assert_eq!(ExpectedFailurePolicy::default(), ExpectedFailurePolicy::Ignore);
    }

    #[test]
    fn frame_interval_from_cap() {
        let mut cfg = SessionConfig::default();
        assert_eq!(cfg.frame_interval(), None);
        cfg.max_fps = 20;
        assert_eq!(cfg.frame_interval(), Some(Duration::from_millis(50)));
    }
}
