//! Priority-ordered backend selection.
//!
//! Candidates are tried from the highest tier down. The first backend that
//! passes both `probe()` and `test()` wins and is cached; every other
//! candidate is released exactly once. `test()` runs directly on the
//! calling thread: wrapping it in a separately scheduled task can deadlock
//! against the platform's own dispatch loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureBackend, default_backends};

/// Shared handle to the selected backend.
pub type BackendHandle = Arc<Mutex<Box<dyn CaptureBackend>>>;

type BackendFactory = Box<dyn Fn() -> Vec<Box<dyn CaptureBackend>> + Send + Sync>;

/// Diagnostic view of one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCandidate {
    pub name: &'static str,
    pub priority: u8,
    pub available: bool,
}

#[derive(Default)]
struct SelectorState {
    candidates: Vec<Box<dyn CaptureBackend>>,
    selected: Option<BackendHandle>,
    selected_name: Option<&'static str>,
    has_selected: bool,
}

// ── BackendSelector ──────────────────────────────────────────────

/// Chooses and owns the capture backend for a session.
pub struct BackendSelector {
    factory: BackendFactory,
    forced: Option<String>,
    state: Mutex<SelectorState>,
}

impl BackendSelector {
    /// Build a selector whose candidates come from `factory`.
    ///
    /// The factory is invoked again after [`reset`](Self::reset), so a
    /// fresh selection starts from fresh backend instances.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Vec<Box<dyn CaptureBackend>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            forced: None,
            state: Mutex::new(SelectorState::default()),
        }
    }

    /// Selector over the built-in backends.
    pub fn with_defaults() -> Self {
        Self::new(default_backends)
    }

    /// Restrict selection to the backend called `name`.
    pub fn force(mut self, name: Option<String>) -> Self {
        self.forced = name;
        self
    }

    /// Pick the highest-tier working backend, or return the cached pick.
    ///
    /// Concurrent callers block on the selector lock and then observe the
    /// cached result.
    pub fn select_best_method(&self) -> Option<BackendHandle> {
        let mut state = self.state.lock();
        if state.has_selected {
            return state.selected.clone();
        }
        if state.candidates.is_empty() {
            state.candidates = self.build_candidates();
        }

        let mut candidates = std::mem::take(&mut state.candidates);
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));

        let mut winner = None;
        for (idx, backend) in candidates.iter_mut().enumerate() {
            let name = backend.name();
            if !guarded(name, "probe", || backend.probe()) {
                debug!(backend = name, "prerequisites not met");
                continue;
            }
            info!(backend = name, tier = backend.priority(), "testing capture backend");
            if guarded(name, "test", || backend.test()) {
                winner = Some(idx);
                break;
            }
            warn!(backend = name, "capture backend failed self-test");
        }

        let winner = winner.map(|idx| candidates.remove(idx));
        for backend in candidates.iter_mut() {
            release_guarded(backend.as_mut());
        }
        drop(candidates);

        match &winner {
            Some(backend) => info!(
                backend = backend.name(),
                tier = backend.priority(),
                "selected capture backend"
            ),
            None => error!("no capture backend passed probe and self-test"),
        }
        state.selected_name = winner.as_ref().map(|b| b.name());
        state.selected = winner.map(|b| Arc::new(Mutex::new(b)));
        state.has_selected = true;
        state.selected.clone()
    }

    /// Release the selected backend and allow a fresh selection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if let Some(handle) = state.selected.take() {
            release_guarded(handle.lock().as_mut());
        }
        for backend in state.candidates.iter_mut() {
            release_guarded(backend.as_mut());
        }
        state.candidates.clear();
        state.selected_name = None;
        state.has_selected = false;
        debug!("backend selection reset");
    }

    /// Name of the cached selection, if any.
    pub fn selected_name(&self) -> Option<&'static str> {
        self.state.lock().selected_name
    }

    pub fn has_selected(&self) -> bool {
        self.state.lock().has_selected
    }

    /// Probe every candidate without testing or keeping it.
    pub fn available(&self) -> Vec<BackendCandidate> {
        let mut candidates = (self.factory)();
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));
        candidates
            .iter_mut()
            .map(|backend| {
                let name = backend.name();
                let candidate = BackendCandidate {
                    name,
                    priority: backend.priority(),
                    available: guarded(name, "probe", || backend.probe()),
                };
                release_guarded(backend.as_mut());
                candidate
            })
            .collect()
    }

    fn build_candidates(&self) -> Vec<Box<dyn CaptureBackend>> {
        let mut candidates = (self.factory)();
        if let Some(forced) = &self.forced {
            let (keep, drop): (Vec<_>, Vec<_>) =
                candidates.into_iter().partition(|b| b.name() == forced);
            for mut backend in drop {
                release_guarded(backend.as_mut());
            }
            if keep.is_empty() {
                warn!(backend = %forced, "forced capture backend is unknown");
            }
            candidates = keep;
        }
        candidates
    }
}

/// Run a backend call, turning a panic into `false`.
fn guarded(name: &str, call: &str, f: impl FnOnce() -> bool) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(ok) => ok,
        Err(_) => {
            error!(backend = name, call, "backend panicked");
            false
        }
    }
}

/// Release one backend; a panic is logged and does not stop cleanup of
/// the others.
fn release_guarded(backend: &mut dyn CaptureBackend) {
    let name = backend.name();
    if catch_unwind(AssertUnwindSafe(|| backend.release())).is_err() {
        error!(backend = name, "backend panicked during release");
    }
}
