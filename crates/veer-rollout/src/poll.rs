//! Cancellable polling against the eventually-consistent control plane.
//!
//! One helper for every "block until predicate P holds or deadline D passes"
//! wait in the crate. The capacity controller and the backend-pool binder
//! both drive their convergence loops through [`poll_until`].

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use veer_core::retry::RetryPolicy;
use veer_provider::error::ProviderResult;

use crate::error::{RolloutError, RolloutResult};

/// Bound on a single provider call inside a poll iteration, distinct from
/// the overall wait budget.
pub const PER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What one poll iteration observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The predicate holds; stop waiting.
    Ready(T),
    /// Not there yet; sleep one interval and re-check.
    Pending,
}

/// Poll `check` at a fixed interval until it reports `Ready`, the deadline
/// passes, or the cancel channel flips to `true`.
///
/// The deadline is tested before each check, so a predicate that first holds
/// at or after the deadline yields `Timeout`. A check that exceeds
/// [`PER_CALL_TIMEOUT`] counts as `Pending` rather than hanging the wait.
pub async fn poll_until<T>(
    revision: &str,
    waiting_for: &str,
    interval: Duration,
    deadline: Duration,
    cancel: &mut watch::Receiver<bool>,
    mut check: impl AsyncFnMut() -> RolloutResult<PollOutcome<T>>,
) -> RolloutResult<T> {
    let started = Instant::now();
    loop {
        if *cancel.borrow() {
            return Err(cancelled_err(revision, waiting_for));
        }
        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return Err(RolloutError::Timeout {
                revision: revision.to_string(),
                waiting_for: waiting_for.to_string(),
                waited: elapsed,
            });
        }

        match tokio::time::timeout(PER_CALL_TIMEOUT, check()).await {
            Ok(Ok(PollOutcome::Ready(value))) => return Ok(value),
            Ok(Ok(PollOutcome::Pending)) => {
                debug!(revision, waiting_for, ?elapsed, "still waiting");
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                warn!(revision, waiting_for, "poll iteration exceeded per-call timeout");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancelled(cancel) => return Err(cancelled_err(revision, waiting_for)),
        }
    }
}

/// Resolves once the cancel channel carries `true`. Never resolves if the
/// sender is gone — a dropped sender means nobody can cancel anymore.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn cancelled_err(revision: &str, waiting_for: &str) -> RolloutError {
    RolloutError::Cancelled {
        revision: revision.to_string(),
        waiting_for: waiting_for.to_string(),
    }
}

/// Run a one-shot provider call, retrying transient errors per the policy.
pub async fn call_with_retry<T>(
    policy: RetryPolicy,
    what: &str,
    mut call: impl AsyncFnMut() -> ProviderResult<T>,
) -> ProviderResult<T> {
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => match policy.delay_after(attempt) {
                Some(delay) => {
                    warn!(what, error = %err, attempt, "transient provider error, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

/// Best-effort variant of `?` for rollback sequences: convert an error into
/// a recorded failure instead of aborting.
pub fn note_failure(failures: &mut Vec<String>, step: &str, result: RolloutResult<()>) {
    if let Err(err) = result {
        warn!(step, error = %err, "rollback step failed, continuing");
        failures.push(format!("{step}: {err}"));
    }
}
