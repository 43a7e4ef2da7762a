//! Single-flight token renewal.
//!
//! The first caller that needs a new token drives the renewal; everyone who
//! asks while it is outstanding is parked on a oneshot channel and receives
//! the exact same outcome, in the order they queued.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outcome shared by the driver and every waiter of one renewal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("token renewal failed: {0}")]
    Rejected(String),

    #[error("no stored token to renew")]
    NoToken,

    #[error("token renewal was abandoned before it completed")]
    Abandoned,
}

pub type RefreshOutcome = Result<String, RefreshError>;

type Waiter = oneshot::Sender<RefreshOutcome>;

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

enum Role {
    Driver,
    Waiter(oneshot::Receiver<RefreshOutcome>),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn in_progress(&self) -> bool {
        self.lock().in_progress
    }

    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Run `renew` unless a renewal is already outstanding, in which case
    /// wait for that one instead. `renew` is only invoked by the driver.
    pub async fn run<F, Fut>(&self, renew: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let role = {
            let mut state = self.lock();
            if state.in_progress {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                debug!(waiters = state.waiters.len(), "Renewal in flight, queued");
                Role::Waiter(rx)
            } else {
                state.in_progress = true;
                Role::Driver
            }
        };

        match role {
            Role::Waiter(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
            Role::Driver => {
                let mut flight = Flight {
                    coordinator: self,
                    settled: false,
                };
                let outcome = renew().await;
                flight.settle(&outcome);
                outcome
            }
        }
    }

    /// Clear the flag, then release every waiter with `outcome`, oldest first
    fn release(&self, outcome: &RefreshOutcome) {
        let waiters = {
            let mut state = self.lock();
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Releasing queued requests");
        }
        for waiter in waiters {
            // A waiter whose caller went away is fine to skip
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Releases the waiters even if the driving future is dropped mid-renewal.
struct Flight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Flight<'_> {
    fn settle(&mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.release(outcome);
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token renewal dropped before completion");
            self.coordinator.release(&Err(RefreshError::Abandoned));
        }
    }
}
