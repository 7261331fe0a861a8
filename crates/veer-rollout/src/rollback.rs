//! Rollback orchestrator — restore the previous revision from its
//! pre-deployment snapshot and retire the failed new revision.
//!
//! Rollback is best-effort by contract: a failing sub-step is recorded and
//! the remaining steps still run, so a half-finished rollback never strands
//! the old revision worse than it already is. All failures are reported
//! together at the end.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use veer_core::tags::{BG_BLUE, BG_GREEN, BG_STATE_TAG};
use veer_core::types::ScalingPolicyDoc;
use veer_provider::clients::{AutoScalePolicyClient, ComputeGroupClient, LoadBalancerClient};

use crate::binder::BackendPoolBinder;
use crate::capacity::CapacityController;
use crate::error::{RolloutError, RolloutResult};
use crate::poll::note_failure;
use crate::request::SwitchRouteRequest;

/// What a rollback actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    /// The revision put back into production, when the snapshot had one.
    pub restored_old_revision: Option<String>,
    /// The new revision that was torn down and deleted.
    pub removed_new_revision: String,
    /// Informational notes about steps that had nothing to do.
    pub skipped: Vec<String>,
}

/// Restores the previous revision to production using a captured snapshot.
pub struct RollbackOrchestrator<C, A, L> {
    compute: Arc<C>,
    autoscale: Arc<A>,
    load_balancer: Arc<L>,
    cancel: watch::Receiver<bool>,
}

impl<C, A, L> RollbackOrchestrator<C, A, L>
where
    C: ComputeGroupClient,
    A: AutoScalePolicyClient,
    L: LoadBalancerClient,
{
    pub fn new(
        compute: Arc<C>,
        autoscale: Arc<A>,
        load_balancer: Arc<L>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            compute,
            autoscale,
            load_balancer,
            cancel,
        }
    }

    /// Reverse a traffic switch: bring the old revision back to its
    /// snapshot capacity, policy, and pool membership, then delete the new
    /// revision outright.
    pub async fn roll_back(&self, request: &SwitchRouteRequest) -> RolloutResult<RollbackReport> {
        let snapshot = request.snapshot.as_ref().ok_or_else(|| {
            RolloutError::InvalidRequest(
                "rollback requires the pre-deployment snapshot".to_string(),
            )
        })?;
        info!(
            new = %request.new_revision,
            old = snapshot.old_revision.as_deref(),
            "rolling back traffic switch"
        );

        let capacity = CapacityController::new(
            self.compute.clone(),
            request.poll_interval,
            self.cancel.clone(),
        );
        let binder = BackendPoolBinder::new(
            self.compute.clone(),
            self.load_balancer.clone(),
            request.retry,
            self.cancel.clone(),
        );

        let mut failures = Vec::new();
        let mut skipped = Vec::new();
        let mut restored = None;

        if let Some(old) = snapshot.old_revision.as_deref() {
            info!(revision = old, "restoring previous revision to snapshot state");
            note_failure(
                &mut failures,
                "clear scaling policies on previous revision",
                self.clear_policies(old).await,
            );
            note_failure(
                &mut failures,
                "restore previous revision capacity",
                capacity
                    .resize_and_await(old, snapshot.desired_capacity, request.steady_state_timeout)
                    .await,
            );
            note_failure(
                &mut failures,
                "restore previous revision min capacity",
                self.set_min(old, snapshot.min_capacity).await,
            );
            note_failure(
                &mut failures,
                "re-attach snapshot scaling policies",
                self.attach_policies(old, &snapshot.scaling_policies).await,
            );
            note_failure(
                &mut failures,
                "tag previous revision blue",
                self.tag(old, BG_BLUE).await,
            );
            note_failure(
                &mut failures,
                "re-attach previous revision to production pool",
                async {
                    binder
                        .attach(old, &request.load_balancer, &request.prod_pool)
                        .await?;
                    binder
                        .await_member_refresh(old, request.steady_state_timeout)
                        .await
                }
                .await,
            );
            restored = Some(old.to_string());
        } else {
            let note =
                "no previous revision recorded in the snapshot, skipping restore".to_string();
            info!(%note);
            skipped.push(note);
        }

        // The failed new revision is always removed rather than parked.
        let new = request.new_revision.as_str();
        info!(revision = new, "tearing down the new revision");
        note_failure(
            &mut failures,
            "detach new revision from production pool",
            async {
                binder.detach(new, &request.prod_pool).await?;
                binder
                    .await_member_refresh(new, request.steady_state_timeout)
                    .await
            }
            .await,
        );
        note_failure(
            &mut failures,
            "tag new revision green",
            self.tag(new, BG_GREEN).await,
        );
        note_failure(
            &mut failures,
            "clear scaling policies on new revision",
            self.clear_policies(new).await,
        );
        note_failure(
            &mut failures,
            "resize new revision to zero",
            capacity
                .resize_and_await(new, 0, request.steady_state_timeout)
                .await,
        );
        note_failure(&mut failures, "delete new revision", self.delete(new).await);

        if failures.is_empty() {
            info!(restored = restored.as_deref(), "rollback complete");
            Ok(RollbackReport {
                restored_old_revision: restored,
                removed_new_revision: request.new_revision.clone(),
                skipped,
            })
        } else {
            Err(RolloutError::RollbackIncomplete { failures })
        }
    }

    async fn clear_policies(&self, revision: &str) -> RolloutResult<()> {
        self.autoscale
            .clear_policies(revision)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))
    }

    async fn attach_policies(
        &self,
        revision: &str,
        docs: &[ScalingPolicyDoc],
    ) -> RolloutResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.autoscale
            .attach_policy_documents(revision, docs)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))
    }

    async fn set_min(&self, revision: &str, min: u32) -> RolloutResult<()> {
        self.compute
            .set_min_capacity(revision, min)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))
    }

    async fn tag(&self, revision: &str, state: &str) -> RolloutResult<()> {
        self.compute
            .update_tag(revision, BG_STATE_TAG, state)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))
    }

    async fn delete(&self, revision: &str) -> RolloutResult<()> {
        self.compute
            .delete_group(revision)
            .await
            .map_err(|e| RolloutError::from_provider(revision, e))
    }
}
