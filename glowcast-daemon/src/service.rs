//! Daemon lifecycle: start the session, report status, stop on shutdown.

use std::future::Future;

use tracing::{info, warn};

use glowcast_core::{BackendSelector, SessionStatus, StreamingSession};

use crate::config::DaemonConfig;

// ── Daemon ───────────────────────────────────────────────────────

/// Owns the streaming session for the lifetime of the process.
pub struct Daemon {
    config: DaemonConfig,
    session: StreamingSession,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        let selector = BackendSelector::with_defaults().force(config.forced_backend());
        let session = StreamingSession::new(config.to_session_config(), selector);
        Self { config, session }
    }

    pub fn session(&self) -> &StreamingSession {
        &self.session
    }

    /// Run until `shutdown` resolves, logging status periodically.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        if self.config.session.enabled {
            self.session.start();
        } else {
            info!("streaming disabled in configuration");
        }

        let mut ticker = tokio::time::interval(self.config.status_interval());
        ticker.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => log_status(&self.session.get_status()),
            }
        }

        self.session.stop().await;
        info!("glowcast stopped");
    }
}

/// One status line, plus the last error when there is one.
pub fn log_status(status: &SessionStatus) {
    info!(
        state = %status.state,
        frames = status.frames_captured,
        fps = status.average_fps,
        errors = status.error_count,
        connected = status.connected,
        backend = status.backend.as_deref().unwrap_or("-"),
        uptime_s = status.uptime.as_secs(),
        "status"
    );
    if let Some(error) = &status.last_error {
        warn!("last error: {error}");
    }
}

/// Human-readable probe results, highest tier first.
pub fn describe_backends(selector: &BackendSelector) -> Vec<String> {
    selector
        .available()
        .into_iter()
        .map(|c| {
            let availability = if c.available { "available" } else { "missing" };
            format!("{:<12} tier {}  {availability}", c.name, c.priority)
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────
