//! User activity tracking.
//!
//! The host UI reports input events and brackets long operations (query
//! execution, imports) with a busy marker. The derived
//! `should_prevent_expiration` signal is advisory: it drives expiry warnings
//! and never changes how tokens are renewed.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

/// Input events that count as user interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
    Focus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityState {
    pub last_interaction_at: Instant,
    pub is_busy: bool,
    pub busy_kind: Option<String>,
}

struct Inner {
    state: ActivityState,
    /// Bumped by every `begin_busy`/`set_busy` so stale guards don't clear a newer marker
    busy_generation: u64,
}

#[derive(Clone)]
pub struct ActivityMonitor {
    inner: Arc<Mutex<Inner>>,
    window: Duration,
}

impl ActivityMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ActivityState {
                    last_interaction_at: Instant::now(),
                    is_busy: false,
                    busy_kind: None,
                },
                busy_generation: 0,
            })),
            window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, _kind: ActivityKind) {
        self.lock().state.last_interaction_at = Instant::now();
    }

    /// Interaction within the trailing window
    pub fn is_active(&self) -> bool {
        self.lock().state.last_interaction_at.elapsed() <= self.window
    }

    pub fn is_busy(&self) -> bool {
        self.lock().state.is_busy
    }

    pub fn busy_kind(&self) -> Option<String> {
        self.lock().state.busy_kind.clone()
    }

    pub fn set_busy(&self, kind: impl Into<String>) -> u64 {
        let mut inner = self.lock();
        inner.busy_generation += 1;
        inner.state.is_busy = true;
        inner.state.busy_kind = Some(kind.into());
        inner.busy_generation
    }

    pub fn clear_busy(&self) {
        let mut inner = self.lock();
        inner.state.is_busy = false;
        inner.state.busy_kind = None;
    }

    /// Mark busy until the returned guard is dropped
    #[must_use = "busy is cleared as soon as the guard is dropped"]
    pub fn begin_busy(&self, kind: impl Into<String>) -> BusyGuard {
        let generation = self.set_busy(kind);
        BusyGuard {
            monitor: self.clone(),
            generation,
        }
    }

    pub fn should_prevent_expiration(&self) -> bool {
        self.is_busy() || self.is_active()
    }

    pub fn snapshot(&self) -> ActivityState {
        self.lock().state.clone()
    }
}

pub struct BusyGuard {
    monitor: ActivityMonitor,
    generation: u64,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut inner = self.monitor.lock();
        if inner.busy_generation == self.generation {
            inner.state.is_busy = false;
            inner.state.busy_kind = None;
        }
    }
}
