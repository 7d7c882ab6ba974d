//! Session lifecycle state and running statistics.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::pipeline::CycleError;
use crate::session::config::{ExpectedFailurePolicy, FPS_HISTORY_LEN};

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle of a [`StreamingSession`](super::StreamingSession).
///
/// ```text
///  Idle ──► Starting ──► Capturing ◄──► Paused
///   ▲          │             │            │
///   │          ▼             ▼            │
///   │        Error ◄─────────┴────────────┘
///   │          │
///   └─ Stopping ◄── (stop from any running state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Capturing,
    Paused,
    Stopping,
    Error,
}

impl SessionState {
    /// Whether `self → next` is a legal transition. Staying put is always
    /// legal.
    pub fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        self == next
            || matches!(
                (self, next),
                (Idle | Error, Starting)
                    | (Starting, Capturing)
                    | (Capturing, Paused)
                    | (Paused, Capturing)
                    | (Starting | Capturing | Paused, Error)
                    | (Starting | Capturing | Paused | Error, Stopping)
                    | (Stopping | Error, Idle)
            )
    }

    /// Running states: the loop is (or is about to be) active.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Capturing | Self::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Capturing => "capturing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ── SessionStatus ────────────────────────────────────────────────

/// Point-in-time snapshot returned by `get_status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub enabled: bool,
    pub frames_captured: u64,
    /// Mean of the retained per-frame rate samples.
    pub average_fps: f64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub connected: bool,
    pub last_error: Option<String>,
    pub started_at: Option<SystemTime>,
    pub uptime: Duration,
    pub backend: Option<String>,
}

// ── SessionStats ─────────────────────────────────────────────────

/// Counters mutated by the loop under the session lock.
#[derive(Debug, Default)]
pub(crate) struct SessionStats {
    pub state: SessionState,
    pub frames_captured: u64,
    pub error_count: u64,
    pub consecutive_errors: u32,
    pub fps_history: VecDeque<f64>,
    pub last_error: Option<String>,
    pub started: Option<(Instant, SystemTime)>,
    pub connected: bool,
    pub backend: Option<&'static str>,
}

/// How a failed cycle was accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAccounting {
    /// Consumed the consecutive-error budget; carries the new streak.
    Counted(u32),
    /// Recorded but left the streak untouched.
    Tolerated,
}

impl SessionStats {
    /// Fresh counters for a new run.
    pub fn begin(&mut self) {
        *self = Self {
            state: self.state,
            started: Some((Instant::now(), SystemTime::now())),
            fps_history: VecDeque::with_capacity(FPS_HISTORY_LEN),
            ..Self::default()
        };
    }

    /// A successful cycle that took `elapsed`.
    pub fn record_frame(&mut self, elapsed: Duration) {
        self.frames_captured += 1;
        self.consecutive_errors = 0;
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            if self.fps_history.len() == FPS_HISTORY_LEN {
                self.fps_history.pop_front();
            }
            self.fps_history.push_back(1.0 / secs);
        }
    }

    /// A failed cycle.
    ///
    /// Transport failures never consume the budget; the next iteration
    /// re-registers instead. Expected capture conditions follow `policy`.
    pub fn record_failure(
        &mut self,
        error: &CycleError,
        policy: ExpectedFailurePolicy,
    ) -> FailureAccounting {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
        let counted = match error {
            CycleError::Transport(_) => false,
            _ if error.is_steady_state() => policy == ExpectedFailurePolicy::Count,
            _ => true,
        };
        if counted {
            self.consecutive_errors += 1;
            FailureAccounting::Counted(self.consecutive_errors)
        } else {
            FailureAccounting::Tolerated
        }
    }

    pub fn average_fps(&self) -> f64 {
        if self.fps_history.is_empty() {
            return 0.0;
        }
        self.fps_history.iter().sum::<f64>() / self.fps_history.len() as f64
    }

    pub fn snapshot(&self, enabled: bool) -> SessionStatus {
        SessionStatus {
            state: self.state,
            enabled,
            frames_captured: self.frames_captured,
            average_fps: self.average_fps(),
            error_count: self.error_count,
            consecutive_errors: self.consecutive_errors,
            connected: self.connected,
            last_error: self.last_error.clone(),
            started_at: self.started.map(|(_, wall)| wall),
            uptime: self
                .started
                .filter(|_| self.state.is_running())
                .map(|(at, _)| at.elapsed())
                .unwrap_or_default(),
            backend: self.backend.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CaptureError, WireError};

    #[test]
    fn transition_table() {
        use SessionState::*;
        assert!(Idle.can_become(Starting));
        assert!(Starting.can_become(Capturing));
        assert!(Capturing.can_become(Paused));
        assert!(Paused.can_become(Capturing));
        assert!(Capturing.can_become(Error));
        assert!(Paused.can_become(Stopping));
        assert!(Stopping.can_become(Idle));
        assert!(Error.can_become(Starting));

        assert!(!Idle.can_become(Capturing));
        assert!(!Stopping.can_become(Capturing));
        assert!(!Idle.can_become(Paused));
        assert!(!Error.can_become(Capturing));
    }

    #[test]
    fn fps_history_is_bounded() {
        let mut stats = SessionStats::default();
        stats.begin();
        for _ in 0..(FPS_HISTORY_LEN + 20) {
            stats.record_frame(Duration::from_millis(20));
        }
        assert_eq!(stats.fps_history.len(), FPS_HISTORY_LEN);
        assert!((stats.average_fps() - 50.0).abs() < 1e-6);
        assert_eq!(stats.frames_captured, FPS_HISTORY_LEN as u64 + 20);
    }

    #[test]
    fn failure_accounting_follows_policy() {
        let mut stats = SessionStats::default();
        let drm = CycleError::Capture(CaptureError::DrmProtected);
        let native = CycleError::Capture(CaptureError::Native { call: "grab", code: 1 });
        let wire = CycleError::Transport(WireError::NotConnected);

        assert_eq!(
            stats.record_failure(&drm, ExpectedFailurePolicy::Ignore),
            FailureAccounting::Tolerated
        );
        assert_eq!(
            stats.record_failure(&native, ExpectedFailurePolicy::Ignore),
            FailureAccounting::Counted(1)
        );
        assert_eq!(
            stats.record_failure(&drm, ExpectedFailurePolicy::Count),
            FailureAccounting::Counted(2)
        );
        assert_eq!(
            stats.record_failure(&wire, ExpectedFailurePolicy::Count),
            FailureAccounting::Tolerated
        );
        assert_eq!(stats.error_count, 4);
        assert!(stats.last_error.as_deref().unwrap().contains("not connected"));

        stats.record_frame(Duration::from_millis(10));
        assert_eq!(stats.consecutive_errors, 0);
    }

    #[test]
    fn snapshot_reports_uptime_only_while_running() {
        let mut stats = SessionStats::default();
        stats.begin();
        stats.state = SessionState::Capturing;
        stats.backend = Some("framebuffer");
        let status = stats.snapshot(true);
        assert!(status.started_at.is_some());
        assert_eq!(status.backend.as_deref(), Some("framebuffer"));

        stats.state = SessionState::Idle;
        assert_eq!(stats.snapshot(false).uptime, Duration::ZERO);
    }
}
