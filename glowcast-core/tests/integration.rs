//! Integration tests: full session lifecycle against an in-process sink
//! on an ephemeral localhost port.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use glowcast_core::capture::{CaptureBackend, Nv12Frame};
use glowcast_core::wire::envelope;
use glowcast_core::{
    BackendSelector, CaptureError, ExpectedFailurePolicy, Reply, Request, SessionConfig,
    SessionState, SessionStatus, SessionTimings, SinkAddress, StreamingSession,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

// ── Fake sink ────────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum SinkMode {
    Grant,
    Refuse,
    /// Grant, then answer the n-th image of each connection with an error.
    RejectAfter(usize),
}

#[derive(Default)]
struct SinkCounters {
    registrations: AtomicUsize,
    images: AtomicUsize,
    bad_images: AtomicUsize,
}

struct FakeSink {
    address: SinkAddress,
    counters: Arc<SinkCounters>,
}

impl FakeSink {
    async fn spawn(mode: SinkMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let counters = Arc::new(SinkCounters::default());

        let accepted = Arc::clone(&counters);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, mode, Arc::clone(&accepted)));
            }
        });

        Self {
            address: SinkAddress::new("127.0.0.1", port),
            counters,
        }
    }

    fn registrations(&self) -> usize {
        self.counters.registrations.load(Ordering::SeqCst)
    }

    fn images(&self) -> usize {
        self.counters.images.load(Ordering::SeqCst)
    }
}

async fn serve(stream: TcpStream, mode: SinkMode, counters: Arc<SinkCounters>) {
    let mut framed = Framed::new(stream, envelope());
    let mut images_here = 0;
    while let Some(Ok(body)) = framed.next().await {
        let reply = match Request::decode(&body) {
            Ok(Request::Register { .. }) => {
                counters.registrations.fetch_add(1, Ordering::SeqCst);
                match mode {
                    SinkMode::Refuse => Some(Reply::default()),
                    _ => Some(Reply::registered()),
                }
            }
            Ok(Request::Image(image)) => {
                counters.images.fetch_add(1, Ordering::SeqCst);
                if image.data_y.len() != (image.width * image.height) as usize
                    || image.data_uv.len() != image.data_y.len() / 2
                {
                    counters.bad_images.fetch_add(1, Ordering::SeqCst);
                }
                images_here += 1;
                match mode {
                    SinkMode::RejectAfter(n) if images_here == n => {
                        Some(Reply::rejected("stream closed by sink"))
                    }
                    _ => None,
                }
            }
            Err(_) => break,
        };
        if let Some(reply) = reply {
            if framed.send(reply.encode().unwrap()).await.is_err() {
                break;
            }
        }
    }
}

// ── Scripted backend ─────────────────────────────────────────────

/// Fails the first `failures` captures with `error()`, then fills frames.
struct Scripted {
    failures: usize,
    error: fn() -> CaptureError,
    calls: Arc<AtomicUsize>,
}

impl CaptureBackend for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }
    fn priority(&self) -> u8 {
        1
    }
    fn probe(&self) -> bool {
        true
    }
    fn test(&mut self) -> bool {
        true
    }
    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err((self.error)());
        }
        let (y, uv) = frame.planes_mut();
        y.fill(120);
        uv.fill(128);
        Ok(())
    }
    fn release(&mut self) {}
}

fn scripted(failures: usize, error: fn() -> CaptureError) -> (BackendSelector, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let shared = Arc::clone(&calls);
    let selector = BackendSelector::new(move || {
        vec![Box::new(Scripted {
            failures,
            error,
            calls: Arc::clone(&shared),
        }) as Box<dyn CaptureBackend>]
    });
    (selector, calls)
}

fn healthy() -> (BackendSelector, Arc<AtomicUsize>) {
    scripted(0, || CaptureError::NotInitialized)
}

fn config(sink: &FakeSink) -> SessionConfig {
    SessionConfig {
        sink: sink.address.clone(),
        width: 16,
        height: 8,
        max_fps: 200,
        timings: SessionTimings {
            pause_poll: Duration::from_millis(10),
            reconnect_delay: Duration::from_millis(20),
            error_backoff: Duration::from_millis(2),
            stop_timeout: Duration::from_secs(5),
            register_timeout: Duration::from_secs(1),
        },
        ..SessionConfig::default()
    }
}

async fn wait_for(what: &str, mut pred: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn status(session: &StreamingSession) -> SessionStatus {
    session.get_status()
}

// ── Registration and streaming ───────────────────────────────────

#[tokio::test]
async fn registered_sink_receives_frames() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = healthy();
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("five frames", || sink.images() >= 5).await;

    let s = status(&session);
    assert_eq!(s.state, SessionState::Capturing);
    assert!(s.connected);
    assert!(s.frames_captured >= 5);
    assert!(s.average_fps > 0.0);
    assert_eq!(s.backend.as_deref(), Some("scripted"));
    assert_eq!(sink.registrations(), 1);
    assert_eq!(sink.counters.bad_images.load(Ordering::SeqCst), 0);

    session.stop().await;
    let s = status(&session);
    assert_eq!(s.state, SessionState::Idle);
    assert!(!s.connected);
}

#[tokio::test]
async fn refused_registration_sends_no_frames() {
    let sink = FakeSink::spawn(SinkMode::Refuse).await;
    let (selector, calls) = healthy();
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("re-registration attempts", || sink.registrations() >= 3).await;

    let s = status(&session);
    assert!(!s.connected);
    assert_eq!(s.frames_captured, 0);
    assert!(s.last_error.unwrap().contains("rejected"));
    assert_eq!(sink.images(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    session.stop().await;
}

#[tokio::test]
async fn sink_error_reply_forces_reregistration() {
    let sink = FakeSink::spawn(SinkMode::RejectAfter(2)).await;
    let (selector, _) = healthy();
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("a second registration", || sink.registrations() >= 2).await;
    wait_for("frames on the new connection", || sink.images() >= 3).await;
    assert!(session.is_enabled());
    session.stop().await;
}

// ── Error budget ─────────────────────────────────────────────────

#[tokio::test]
async fn ten_consecutive_failures_disable_the_session() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, calls) = scripted(usize::MAX, || CaptureError::Native {
        call: "grab",
        code: -7,
    });
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("error state", || status(&session).state == SessionState::Error).await;

    let s = status(&session);
    assert!(!s.enabled);
    assert_eq!(s.error_count, 10);
    assert_eq!(s.consecutive_errors, 10);
    assert!(s.last_error.unwrap().contains("-7"));
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(sink.images(), 0);

    session.stop().await;
    assert_eq!(status(&session).state, SessionState::Idle);
}

#[tokio::test]
async fn nine_failures_then_success_keeps_capturing() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = scripted(9, || CaptureError::NotInitialized);
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("first frame", || status(&session).frames_captured >= 1).await;

    let s = status(&session);
    assert_eq!(s.state, SessionState::Capturing);
    assert!(s.enabled);
    assert_eq!(s.error_count, 9);
    assert_eq!(s.consecutive_errors, 0);
    session.stop().await;
}

#[tokio::test]
async fn drm_failures_do_not_consume_budget_by_default() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = scripted(usize::MAX, || CaptureError::DrmProtected);
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("repeated DRM failures", || status(&session).error_count >= 15).await;

    let s = status(&session);
    assert_eq!(s.state, SessionState::Capturing);
    assert!(s.enabled);
    assert_eq!(s.consecutive_errors, 0);
    assert!(s.last_error.unwrap().contains("DRM"));
    session.stop().await;
}

#[tokio::test]
async fn drm_failures_count_when_policy_says_so() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = scripted(usize::MAX, || CaptureError::DrmProtected);
    let mut cfg = config(&sink);
    cfg.expected_failures = ExpectedFailurePolicy::Count;
    let session = StreamingSession::new(cfg, selector);

    session.start();
    wait_for("error state", || status(&session).state == SessionState::Error).await;
    assert_eq!(status(&session).error_count, 10);
    session.stop().await;
}

#[tokio::test]
async fn blank_frames_count_toward_budget() {
    struct Blank;
    impl CaptureBackend for Blank {
        fn name(&self) -> &'static str {
            "blank"
        }
        fn priority(&self) -> u8 {
            1
        }
        fn probe(&self) -> bool {
            true
        }
        fn test(&mut self) -> bool {
            true
        }
        fn capture_into(&mut self, _frame: &mut Nv12Frame) -> Result<(), CaptureError> {
            Ok(())
        }
        fn release(&mut self) {}
    }

    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let selector = BackendSelector::new(|| vec![Box::new(Blank) as Box<dyn CaptureBackend>]);
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("error state", || status(&session).state == SessionState::Error).await;
    assert!(status(&session).last_error.unwrap().contains("blank"));
    assert_eq!(sink.images(), 0);
    session.stop().await;
}

// ── Control ──────────────────────────────────────────────────────

#[tokio::test]
async fn pause_stops_frames_until_resume() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = healthy();
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("first frames", || sink.images() >= 2).await;

    session.pause();
    wait_for("paused state", || status(&session).state == SessionState::Paused).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let frozen = status(&session).frames_captured;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(status(&session).frames_captured, frozen);

    session.resume();
    wait_for("frames after resume", || status(&session).frames_captured > frozen).await;
    session.stop().await;
}

#[tokio::test]
async fn error_state_recovers_on_reenable() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = scripted(10, || CaptureError::NotInitialized);
    let session = StreamingSession::new(config(&sink), selector);

    session.start();
    wait_for("error state", || status(&session).state == SessionState::Error).await;

    session.set_enabled(true).await;
    wait_for("frames after re-enable", || status(&session).frames_captured >= 1).await;
    let s = status(&session);
    assert_eq!(s.state, SessionState::Capturing);
    assert_eq!(s.error_count, 0);
    session.stop().await;
}

// ── Shutdown bounds ──────────────────────────────────────────────

#[tokio::test]
async fn stop_interrupts_error_backoff() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let (selector, _) = scripted(usize::MAX, || CaptureError::DrmProtected);
    let mut cfg = config(&sink);
    cfg.timings.error_backoff = Duration::from_secs(30);
    let session = StreamingSession::new(cfg, selector);

    session.start();
    wait_for("first failure", || status(&session).error_count >= 1).await;

    let began = std::time::Instant::now();
    session.stop().await;
    assert!(began.elapsed() < Duration::from_secs(2));
    assert_eq!(status(&session).state, SessionState::Idle);
}

/// Capture that blocks in the driver for `hang` on every call.
struct Stalled {
    hang: Duration,
    calls: Arc<AtomicUsize>,
}

impl CaptureBackend for Stalled {
    fn name(&self) -> &'static str {
        "stalled"
    }
    fn priority(&self) -> u8 {
        1
    }
    fn probe(&self) -> bool {
        true
    }
    fn test(&mut self) -> bool {
        true
    }
    fn capture_into(&mut self, frame: &mut Nv12Frame) -> Result<(), CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.hang);
        frame.planes_mut().0.fill(60);
        Ok(())
    }
    fn release(&mut self) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_returns_while_capture_is_stuck_in_driver() {
    let sink = FakeSink::spawn(SinkMode::Grant).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let factory_calls = Arc::clone(&calls);
    let selector = BackendSelector::new(move || {
        vec![Box::new(Stalled {
            hang: Duration::from_secs(3),
            calls: Arc::clone(&factory_calls),
        }) as Box<dyn CaptureBackend>]
    });
    let mut cfg = config(&sink);
    cfg.timings.stop_timeout = Duration::from_millis(200);
    let session = StreamingSession::new(cfg, selector);

    session.start();
    wait_for("capture in flight", || calls.load(Ordering::SeqCst) >= 1).await;

    let began = std::time::Instant::now();
    session.stop().await;
    assert!(began.elapsed() < Duration::from_millis(1500));

    let s = status(&session);
    assert_eq!(s.state, SessionState::Idle);
    assert!(!s.connected);
    assert_eq!(s.backend, None);
}
