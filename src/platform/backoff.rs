//! Retry and backoff state machine for rate-limited sources
//!
//! Transitions are a plain table: [`RetryMachine::step`] takes an event and
//! returns what the caller should do. Waiting is not modelled as suspension;
//! while backing off the caller simply skips its requests until the
//! deadline passes.
//!
//! ```text
//! Normal  --fail-->            Refresh
//! Refresh --fail-->            Refresh | Backoff (refreshes used up) | Raise (backoffs used up)
//! Backoff --in backoff time--> Backoff | Refresh (deadline passed)
//! Raise   --fail-->            Raise
//! any     --success-->         Normal
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::PlatformError;
use crate::site::ProcessContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Normal,
    Refresh,
    Backoff,
    Raise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryEvent {
    RequestSucceeded,
    RequestFailed,
    InBackoffTime,
}

/// What the caller must do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryAction {
    pub refresh_client: bool,
    pub propagate_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_refresh: u32,
    pub max_backoff: u32,
    /// Backoff number `n` lasts `backoff_unit * n^2`
    pub backoff_unit: Duration,
    /// Chance of refreshing the client anyway while raising
    pub raise_refresh_chance: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_refresh: 3,
            max_backoff: 3,
            backoff_unit: Duration::from_secs(5 * 60),
            raise_refresh_chance: 0.1236,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryMachine {
    state: RetryState,
    refresh_count: u32,
    backoff_count: u32,
    backoff_until: Option<DateTime<Utc>>,
    policy: RetryPolicy,
}

impl Default for RetryMachine {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: RetryState::Normal,
            refresh_count: 0,
            backoff_count: 0,
            backoff_until: None,
            policy,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn refresh_count(&self) -> u32 {
        self.refresh_count
    }

    pub fn backoff_count(&self) -> u32 {
        self.backoff_count
    }

    pub fn backoff_until(&self) -> Option<DateTime<Utc>> {
        self.backoff_until
    }

    fn reset(&mut self) {
        self.refresh_count = 0;
        self.backoff_count = 0;
        self.backoff_until = None;
    }

    fn in_backoff_time(&self, now: DateTime<Utc>) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }

    fn enter_refresh(&mut self, action: &mut RetryAction) {
        self.refresh_count += 1;
        action.refresh_client = true;
        warn!(
            refresh_count = self.refresh_count,
            max_refresh = self.policy.max_refresh,
            "Refreshing client"
        );
    }

    /// Apply one event. `roll` is a uniform sample in `[0, 1)` used for the
    /// random refresh while raising.
    pub fn step(&mut self, event: RetryEvent, now: DateTime<Utc>, roll: f64) -> RetryAction {
        use RetryEvent::*;
        use RetryState::*;

        let from = self.state;
        let (to, mut action) = match (from, event) {
            (_, RequestSucceeded) => {
                self.reset();
                (Normal, RetryAction::default())
            }
            (Normal, RequestFailed) => (Refresh, RetryAction::default()),
            (Refresh, RequestFailed) if self.refresh_count >= self.policy.max_refresh => {
                if self.backoff_count >= self.policy.max_backoff {
                    (Raise, RetryAction::default())
                } else {
                    self.refresh_count = 0;
                    self.backoff_count += 1;
                    let factor = self.backoff_count * self.backoff_count;
                    let delay = chrono::Duration::from_std(self.policy.backoff_unit * factor)
                        .unwrap_or_else(|_| chrono::Duration::days(1));
                    self.backoff_until = Some(now + delay);
                    warn!(
                        backoff_count = self.backoff_count,
                        max_backoff = self.policy.max_backoff,
                        until = ?self.backoff_until,
                        "Backing off"
                    );
                    (Backoff, RetryAction::default())
                }
            }
            (Refresh, RequestFailed) => (Refresh, RetryAction::default()),
            (Backoff, InBackoffTime) if !self.in_backoff_time(now) => {
                self.backoff_until = None;
                (Refresh, RetryAction::default())
            }
            (Backoff, _) => (Backoff, RetryAction::default()),
            (Raise, RequestFailed) => (Raise, RetryAction::default()),
            (state, InBackoffTime) => (state, RetryAction::default()),
        };

        // entry actions
        match (to, event) {
            (Refresh, RequestFailed) => self.enter_refresh(&mut action),
            (Refresh, InBackoffTime) if from == Backoff => self.enter_refresh(&mut action),
            (Raise, RequestFailed) => {
                action.propagate_error = true;
                if roll < self.policy.raise_refresh_chance {
                    action.refresh_client = true;
                    warn!("Random client refresh while raising");
                }
            }
            _ => {}
        }

        debug!(from = ?from, to = ?to, event = ?event, "Retry state transition");
        self.state = to;
        action
    }
}

/// Whether a guarded request should be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Skip,
}

/// Shared [`RetryMachine`] wrapping the requests of one platform
#[derive(Debug, Default)]
pub struct RetryGuard {
    machine: Mutex<RetryMachine>,
}

impl RetryGuard {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            machine: Mutex::new(RetryMachine::new(policy)),
        }
    }

    pub async fn state(&self) -> RetryState {
        self.machine.lock().await.state()
    }

    pub async fn before_request(&self, now: DateTime<Utc>) -> (Gate, RetryAction) {
        let mut machine = self.machine.lock().await;
        if machine.state() == RetryState::Backoff {
            warn!("Request skipped while backing off");
            let action = machine.step(RetryEvent::InBackoffTime, now, rand::random());
            return (Gate::Skip, action);
        }
        (Gate::Proceed, RetryAction::default())
    }

    pub async fn after_request(&self, ok: bool, now: DateTime<Utc>) -> RetryAction {
        let event = if ok {
            RetryEvent::RequestSucceeded
        } else {
            RetryEvent::RequestFailed
        };
        self.machine.lock().await.step(event, now, rand::random())
    }

    /// Run `op` under the guard
    ///
    /// Errors matching `counts_as_failure` drive the state machine and are
    /// absorbed as `Ok(None)` until the machine reaches `Raise`. Other errors
    /// pass through untouched.
    pub async fn run<T, F, Fut, P>(
        &self,
        ctx: &ProcessContext,
        counts_as_failure: P,
        op: F,
    ) -> Result<Option<T>, PlatformError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
        P: Fn(&PlatformError) -> bool,
    {
        let (gate, action) = self.before_request(Utc::now()).await;
        if action.refresh_client {
            ctx.refresh_client().await?;
        }
        if gate == Gate::Skip {
            return Ok(None);
        }

        match op().await {
            Ok(value) => {
                self.after_request(true, Utc::now()).await;
                Ok(Some(value))
            }
            Err(e) if counts_as_failure(&e) => {
                warn!(error = %e, "Guarded request failed");
                let action = self.after_request(false, Utc::now()).await;
                if action.refresh_client {
                    ctx.refresh_client().await?;
                }
                if action.propagate_error {
                    Err(e)
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    }
}
