//! Capacity controller — resize a revision and wait for steady state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use veer_provider::clients::{ComputeGroupClient, ResizeStatus};

use crate::error::{RolloutError, RolloutResult};
use crate::poll::{PollOutcome, poll_until};

/// Resizes scale sets and blocks until every member instance reaches a
/// terminal provisioning state.
///
/// Callers downsizing a revision must clear its scaling policy first; the
/// controller never auto-clears, so a leftover policy would fight the manual
/// capacity change.
pub struct CapacityController<C> {
    compute: Arc<C>,
    interval: Duration,
    cancel: watch::Receiver<bool>,
}

impl<C> Clone for CapacityController<C> {
    fn clone(&self) -> Self {
        Self {
            compute: self.compute.clone(),
            interval: self.interval,
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: ComputeGroupClient> CapacityController<C> {
    pub fn new(compute: Arc<C>, interval: Duration, cancel: watch::Receiver<bool>) -> Self {
        Self {
            compute,
            interval,
            cancel,
        }
    }

    /// Issue an asynchronous resize, then poll member instances until the
    /// target capacity is reached in a terminal state, the resize itself
    /// reports failure, the timeout elapses, or the rollout is cancelled.
    pub async fn resize_and_await(
        &self,
        revision: &str,
        target_capacity: u32,
        timeout: Duration,
    ) -> RolloutResult<()> {
        info!(revision, target_capacity, "resizing scale set");
        let op = self
            .compute
            .resize(revision, target_capacity)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))?;

        let waiting_for = format!("capacity {target_capacity}");
        let mut cancel = self.cancel.clone();
        poll_until(
            revision,
            &waiting_for,
            self.interval,
            timeout,
            &mut cancel,
            async || {
                match self.compute.resize_status(&op).await {
                    Ok(ResizeStatus::Failed(message)) => {
                        return Err(RolloutError::ResizeFailed {
                            revision: revision.to_string(),
                            target_capacity,
                            message,
                        });
                    }
                    Ok(_) => {}
                    Err(e) if e.is_transient() => {
                        debug!(revision, error = %e, "throttled reading resize status");
                        return Ok(PollOutcome::Pending);
                    }
                    Err(e) => return Err(RolloutError::from_provider(revision, e)),
                }

                match self.compute.list_member_instances(revision).await {
                    Ok(instances) => {
                        let settled = instances.len() as u32 == target_capacity
                            && instances.iter().all(|i| i.state.is_terminal());
                        let drained = target_capacity == 0 && instances.is_empty();
                        if settled || drained {
                            Ok(PollOutcome::Ready(()))
                        } else {
                            Ok(PollOutcome::Pending)
                        }
                    }
                    Err(e) if e.is_transient() => {
                        debug!(revision, error = %e, "throttled listing member instances");
                        Ok(PollOutcome::Pending)
                    }
                    Err(e) => Err(RolloutError::from_provider(revision, e)),
                }
            },
        )
        .await?;

        info!(revision, target_capacity, "scale set reached steady state");
        Ok(())
    }
}
