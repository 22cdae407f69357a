//! Single-flight token refresh coordination
//!
//! One coordinator per transport instance. It holds the refresh flag and the
//! FIFO queue of requests waiting for a fresh access token.
//!
//! Transitions:
//! - Idle → Refreshing (first 401; that request leads and is queued first)
//! - Refreshing → Refreshing (further 401s join the queue)
//! - Refreshing → Idle (refresh settled; queue drained FIFO exactly once)
//!
//! A successful refresh bumps `epoch`. A request remembers the epoch it was
//! sent under; a 401 arriving after a newer refresh already settled gets
//! the current token straight away instead of starting another refresh.

use std::collections::VecDeque;

use common::Secret;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::Error;

/// Result handed to every waiter when a refresh settles.
pub(crate) type Outcome = std::result::Result<Secret<String>, Error>;

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

/// How a request that saw a 401 obtains its retry token.
pub(crate) enum Ticket {
    /// A refresh settled after the request was sent; retry with this token.
    Ready(Secret<String>),
    /// Queued behind an in-progress refresh.
    Queued(oneshot::Receiver<Outcome>),
    /// Started the refresh; first in the queue.
    Leader(oneshot::Receiver<Outcome>),
}

struct State {
    refreshing: bool,
    epoch: u64,
    latest: Option<Secret<String>>,
    waiters: VecDeque<oneshot::Sender<Outcome>>,
}

pub struct RefreshCoordinator {
    state: Mutex<State>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                refreshing: false,
                epoch: 0,
                latest: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Counter of successful refreshes and credential installs.
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn phase(&self) -> RefreshPhase {
        if self.state.lock().refreshing {
            RefreshPhase::Refreshing
        } else {
            RefreshPhase::Idle
        }
    }

    /// Number of requests waiting on the in-progress refresh.
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Register interest in a fresh token after a 401.
    pub(crate) fn join(&self, seen_epoch: u64) -> Ticket {
        let mut state = self.state.lock();

        if state.refreshing {
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            debug!(queued = state.waiters.len(), "refresh in progress, request queued");
            return Ticket::Queued(rx);
        }

        if state.epoch != seen_epoch
            && let Some(token) = state.latest.clone()
        {
            debug!("token already refreshed since request was sent");
            return Ticket::Ready(token);
        }

        let (tx, rx) = oneshot::channel();
        state.refreshing = true;
        state.waiters.push_back(tx);
        Ticket::Leader(rx)
    }

    /// Finish the in-progress refresh and drain the queue in FIFO order.
    ///
    /// Returns the number of waiters notified.
    pub(crate) fn settle(&self, outcome: Outcome) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.refreshing = false;
            match &outcome {
                Ok(token) => {
                    state.epoch += 1;
                    state.latest = Some(token.clone());
                }
                Err(_) => state.latest = None,
            }
            std::mem::take(&mut state.waiters)
        };

        let drained = waiters.len();
        for waiter in waiters {
            // A waiter whose caller cancelled has dropped its receiver
            let _ = waiter.send(outcome.clone());
        }
        drained
    }

    /// Record credentials installed outside a refresh (login).
    pub(crate) fn install(&self, token: Secret<String>) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.latest = Some(token);
    }

    /// Token from the last successful refresh or install, if still valid.
    pub(crate) fn latest(&self) -> Option<Secret<String>> {
        self.state.lock().latest.clone()
    }

    /// Forget the last known token (logout).
    pub(crate) fn forget(&self) {
        self.state.lock().latest = None;
    }
}

/// Settles the coordinator with an error if the refresh task ends without
/// settling, so queued requests never hang.
pub(crate) struct PendingSettle<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl<'a> PendingSettle<'a> {
    pub(crate) fn new(coordinator: &'a RefreshCoordinator) -> Self {
        Self {
            coordinator,
            settled: false,
        }
    }

    pub(crate) fn settle(mut self, outcome: Outcome) -> usize {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for PendingSettle<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .settle(Err(Error::RefreshFailed("refresh task aborted".into())));
        }
    }
}
