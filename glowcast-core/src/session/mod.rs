//! # Streaming session
//!
//! [`StreamingSession`] owns the background capture loop. Each iteration:
//!
//! 1. paused → sleep for the poll interval and check again;
//! 2. not connected → register with the sink, waiting the reconnect delay
//!    after a failure;
//! 3. connected → run one [`FramePipeline`] cycle and record the frame
//!    rate, or count the failure and back off.
//!
//! Every delay is raced against the session's cancellation token so
//! `stop()` never waits out a full delay. After
//! [`MAX_CONSECUTIVE_ERRORS`] counted failures in a row the session moves to
//! [`SessionState::Error`] and disables itself until re-enabled.
//!
//! Control calls never fail: problems show up in [`SessionStatus`].

pub mod config;
pub mod state;

pub use config::{
    ExpectedFailurePolicy, FPS_HISTORY_LEN, MAX_CONSECUTIVE_ERRORS, SessionConfig, SessionTimings,
};
pub use state::{SessionState, SessionStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::capture::BackendSelector;
use crate::error::GlowError;
use crate::pipeline::FramePipeline;
use crate::session::state::{FailureAccounting, SessionStats};
use crate::wire::WireClient;

// ── Shared ───────────────────────────────────────────────────────

/// State visible to both the control side and the loop.
struct Shared {
    config: SessionConfig,
    selector: BackendSelector,
    stats: Mutex<SessionStats>,
    enabled: AtomicBool,
    paused: AtomicBool,
}

impl Shared {
    fn transition(&self, next: SessionState) -> bool {
        apply(&mut self.stats.lock(), next)
    }

    fn set_connected(&self, connected: bool) {
        self.stats.lock().connected = connected;
    }

    /// Record a fault that ends the run.
    fn fail(&self, message: String) {
        error!("{message}");
        let mut stats = self.stats.lock();
        stats.error_count += 1;
        stats.last_error = Some(message);
        apply(&mut stats, SessionState::Error);
        self.enabled.store(false, Ordering::SeqCst);
    }
}

fn apply(stats: &mut SessionStats, next: SessionState) -> bool {
    let current = stats.state;
    if current == next {
        return true;
    }
    if !current.can_become(next) {
        debug!(from = %current, to = %next, "ignoring session transition");
        return false;
    }
    debug!(from = %current, to = %next, "session state");
    stats.state = next;
    true
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

// ── StreamingSession ─────────────────────────────────────────────

/// Drives capture and submission against one sink.
pub struct StreamingSession {
    shared: Arc<Shared>,
    running: Mutex<Option<RunningLoop>>,
}

impl StreamingSession {
    pub fn new(config: SessionConfig, selector: BackendSelector) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                selector,
                stats: Mutex::new(SessionStats::default()),
                enabled: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        }
    }

    /// Spawn the capture loop on the current runtime.
    ///
    /// Returns `false` when the loop is already running or no runtime is
    /// available.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("start ignored: session already running");
            return false;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.shared.stats.lock().last_error = Some(format!("no async runtime: {e}"));
                error!("cannot start session outside a tokio runtime: {e}");
                return false;
            }
        };
        {
            let mut stats = self.shared.stats.lock();
            if !apply(&mut stats, SessionState::Starting) {
                return false;
            }
            stats.begin();
        }
        self.shared.enabled.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_loop(Arc::clone(&self.shared), cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });
        info!(sink = %self.shared.config.sink, "streaming session starting");
        true
    }

    /// Cancel the loop and wait for it, aborting it after the stop timeout.
    ///
    /// The backend release is bounded by the same timeout: a native call
    /// that never returns keeps the backend busy, and its release then
    /// finishes on the blocking pool after `stop` has returned.
    pub async fn stop(&self) {
        self.shared.enabled.store(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        let running = self.running.lock().take();

        if let Some(RunningLoop { cancel, mut handle }) = running {
            self.shared.transition(SessionState::Stopping);
            cancel.cancel();
            let deadline = self.shared.config.timings.stop_timeout;
            match timeout(deadline, &mut handle).await {
                Ok(Ok(())) => info!("capture loop stopped gracefully"),
                Ok(Err(e)) => warn!("capture loop ended abnormally: {e}"),
                Err(_) => {
                    warn!(timeout = ?deadline, "capture loop did not stop in time; forcing shutdown");
                    handle.abort();
                }
            }
            if timeout(deadline, release_backend(&self.shared)).await.is_err() {
                warn!("capture backend still busy; releasing it in the background");
                self.shared.stats.lock().backend = None;
            }
        }

        let mut stats = self.shared.stats.lock();
        stats.connected = false;
        if stats.state != SessionState::Idle {
            apply(&mut stats, SessionState::Stopping);
            apply(&mut stats, SessionState::Idle);
        }
    }

    /// Stop, then start again.
    pub async fn restart(&self) -> bool {
        self.stop().await;
        self.start()
    }

    /// `true` starts the session, `false` stops it.
    ///
    /// Enabling a session that disabled itself first reaps the old loop.
    pub async fn set_enabled(&self, enabled: bool) {
        if enabled {
            if self.get_status().state == SessionState::Error {
                self.stop().await;
            }
            self.start();
        } else {
            self.stop().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::SeqCst)
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        let mut stats = self.shared.stats.lock();
        if stats.state == SessionState::Capturing {
            apply(&mut stats, SessionState::Paused);
        }
        info!("streaming paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        let mut stats = self.shared.stats.lock();
        if stats.state == SessionState::Paused {
            apply(&mut stats, SessionState::Capturing);
        }
        info!("streaming resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn get_status(&self) -> SessionStatus {
        let enabled = self.is_enabled();
        self.shared.stats.lock().snapshot(enabled)
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

// ── Loop ─────────────────────────────────────────────────────────

/// Sleep for `delay`; `false` when cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    match prepare(&shared).await {
        Ok(pipeline) => {
            if shared.transition(SessionState::Capturing) {
                stream(&shared, &pipeline, &cancel).await;
            }
        }
        Err(e) => shared.fail(e.to_string()),
    }
    release_backend(&shared).await;
    debug!("capture loop exited");
}

/// Select a backend and allocate the pipeline for it.
async fn prepare(shared: &Arc<Shared>) -> Result<FramePipeline, GlowError> {
    let selecting = Arc::clone(shared);
    let handle = tokio::task::spawn_blocking(move || selecting.selector.select_best_method())
        .await
        .map_err(|e| GlowError::Selection(e.to_string()))?
        .ok_or(GlowError::NoBackend)?;

    let config = &shared.config;
    let pipeline = FramePipeline::new(handle, config.width, config.height)?;
    let name = pipeline.backend_name();
    shared.stats.lock().backend = Some(name);
    info!(
        backend = name,
        width = config.width,
        height = config.height,
        "capture pipeline ready"
    );
    Ok(pipeline)
}

async fn stream(shared: &Shared, pipeline: &FramePipeline, cancel: &CancellationToken) {
    let config = &shared.config;
    let timings = config.timings;
    let frame_interval = config.frame_interval();
    let mut client = WireClient::new(config.sink.clone())
        .with_origin(config.origin.clone())
        .with_register_timeout(timings.register_timeout);

    while shared.enabled.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        if shared.paused.load(Ordering::SeqCst) {
            shared.transition(SessionState::Paused);
            if !sleep_or_cancel(cancel, timings.pause_poll).await {
                break;
            }
            continue;
        }
        shared.transition(SessionState::Capturing);

        if !client.is_connected() {
            shared.set_connected(false);
            let registered = tokio::select! {
                _ = cancel.cancelled() => break,
                result = client.register() => result,
            };
            match registered {
                Ok(()) => shared.set_connected(true),
                Err(e) => {
                    warn!(sink = %client.address(), "registration failed: {e}");
                    shared.stats.lock().last_error = Some(e.to_string());
                    if !sleep_or_cancel(cancel, timings.reconnect_delay).await {
                        break;
                    }
                }
            }
            continue;
        }

        let started = Instant::now();
        match pipeline.run_cycle(&client).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                let (frames, fps) = {
                    let mut stats = shared.stats.lock();
                    stats.record_frame(elapsed);
                    (stats.frames_captured, stats.average_fps())
                };
                trace!(frames, ms = elapsed.as_secs_f64() * 1000.0, "frame sent");
                if config.perf_log_every > 0 && frames % config.perf_log_every == 0 {
                    debug!(frames, fps, "capture performance");
                }
                if let Some(interval) = frame_interval {
                    if elapsed < interval && !sleep_or_cancel(cancel, interval - elapsed).await {
                        break;
                    }
                }
            }
            Err(e) => {
                let accounting = shared
                    .stats
                    .lock()
                    .record_failure(&e, config.expected_failures);
                if !client.is_connected() {
                    shared.set_connected(false);
                }
                match accounting {
                    FailureAccounting::Counted(streak) if streak >= MAX_CONSECUTIVE_ERRORS => {
                        error!(streak, "too many consecutive failures, disabling session: {e}");
                        shared.enabled.store(false, Ordering::SeqCst);
                        shared.transition(SessionState::Error);
                        break;
                    }
                    FailureAccounting::Counted(streak) => warn!(streak, "capture cycle failed: {e}"),
                    FailureAccounting::Tolerated => warn!("frame skipped: {e}"),
                }
                if !sleep_or_cancel(cancel, timings.error_backoff).await {
                    break;
                }
            }
        }
    }

    client.disconnect().await;
    shared.set_connected(false);
}

/// Release the selected backend off the async threads.
async fn release_backend(shared: &Arc<Shared>) {
    let releasing = Arc::clone(shared);
    if let Err(e) = tokio::task::spawn_blocking(move || releasing.selector.reset()).await {
        warn!("releasing capture backend failed: {e}");
    }
    shared.stats.lock().backend = None;
}
