//! Single-flight coordination of access-token refreshes.
//!
//! The first request to see an expired token becomes the leader and performs
//! the refresh; requests that fail while it is in flight subscribe to the
//! cycle's broadcast and reuse its outcome. Every cycle gets a fresh channel,
//! so a waiter always receives the outcome of the cycle it queued behind.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::warn;

use crate::api::HttpError;

/// New access token, or the error every queued request fails with.
pub type RefreshOutcome = Result<String, HttpError>;

enum Phase {
    Idle,
    Refreshing(watch::Sender<Option<RefreshOutcome>>),
}

pub struct RefreshCoordinator {
    phase: Mutex<Phase>,
}

/// Role handed out by [`RefreshCoordinator::begin`].
pub enum Ticket<'a> {
    Leader(RefreshLease<'a>),
    Waiter(RefreshWaiter),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Idle),
        }
    }

    /// Check-and-set in one critical section: become the leader of a new
    /// cycle, or join the one in flight.
    pub fn begin(&self) -> Ticket<'_> {
        let mut phase = self.phase.lock();
        if let Phase::Refreshing(sender) = &*phase {
            return Ticket::Waiter(RefreshWaiter {
                receiver: sender.subscribe(),
            });
        }

        let (sender, _) = watch::channel(None);
        *phase = Phase::Refreshing(sender);
        Ticket::Leader(RefreshLease {
            coordinator: self,
            finished: false,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Refreshing(_))
    }

    /// Number of requests queued behind the refresh in flight.
    pub fn waiting(&self) -> usize {
        match &*self.phase.lock() {
            Phase::Refreshing(sender) => sender.receiver_count(),
            Phase::Idle => 0,
        }
    }

    /// Return to idle, then publish. `None` closes the channel unpublished.
    fn finish(&self, outcome: Option<RefreshOutcome>) {
        let previous = std::mem::replace(&mut *self.phase.lock(), Phase::Idle);
        if let (Phase::Refreshing(sender), Some(outcome)) = (previous, outcome) {
            sender.send_replace(Some(outcome));
        }
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the leader for the duration of one refresh cycle.
///
/// Dropping it without calling [`complete`](Self::complete) (the leader's
/// future was cancelled) ends the cycle and fails its waiters with
/// [`HttpError::RefreshAborted`].
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl RefreshLease<'_> {
    pub fn complete(mut self, outcome: RefreshOutcome) {
        self.finished = true;
        self.coordinator.finish(Some(outcome));
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Token refresh abandoned before completion");
            self.coordinator.finish(None);
        }
    }
}

pub struct RefreshWaiter {
    receiver: watch::Receiver<Option<RefreshOutcome>>,
}

impl RefreshWaiter {
    /// Wait for the first published outcome of this cycle.
    pub async fn outcome(mut self) -> RefreshOutcome {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(published) => published.clone().unwrap_or(Err(HttpError::RefreshAborted)),
            Err(_) => Err(HttpError::RefreshAborted),
        }
    }
}
