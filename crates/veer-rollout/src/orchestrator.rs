//! Rollout orchestrator — drives the Setup→Deploy→SwitchRoute state machine.
//!
//! One logical task per rollout request; steps are strictly sequential
//! because each step's correctness depends on the previous step's committed
//! state. Failures abort the sequence with the failing phase attached — no
//! automatic compensation runs. Operators roll back explicitly through
//! [`RollbackOrchestrator`](crate::rollback::RollbackOrchestrator) with the
//! snapshot captured during discovery.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::info;

use veer_core::retry::RetryPolicy;
use veer_core::tags::{BG_BLUE, BG_GREEN, BG_STATE_TAG, scale_set_name, tags_for_new_revision};
use veer_core::types::{InstanceCounts, ScaleSetRevision, ScalingPolicyDoc};
use veer_provider::clients::{AutoScalePolicyClient, ComputeGroupClient, LoadBalancerClient};

use crate::binder::BackendPoolBinder;
use crate::capacity::CapacityController;
use crate::discovery::{
    RevisionDiscovery, most_recent_active, most_recent_active_or_blue, next_revision_number,
};
use crate::error::{RolloutError, RolloutResult};
use crate::poll::call_with_retry;
use crate::request::{
    DeploymentResult, PreDeploymentSnapshot, ResizeOrder, RolloutRequest, SwitchRouteRequest,
};
use crate::retention::{RetentionPruner, plan_retention};
use crate::rollback::{RollbackOrchestrator, RollbackReport};

/// Current phase of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RolloutPhase {
    Discovering,
    Pruning,
    Creating,
    Resizing,
    SwappingRoute,
    Done,
    Failed,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RolloutPhase::Discovering => "discovering",
            RolloutPhase::Pruning => "pruning",
            RolloutPhase::Creating => "creating",
            RolloutPhase::Resizing => "resizing",
            RolloutPhase::SwappingRoute => "swapping route",
            RolloutPhase::Done => "done",
            RolloutPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a `switch_route` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Traffic now flows to the new revision.
    Switched {
        /// Why the old revision was left at its current capacity, when it
        /// was.
        downscale_skipped: Option<String>,
    },
    /// The previous revision was restored from its snapshot.
    RolledBack(RollbackReport),
}

/// Produces a new revision and moves traffic onto it.
pub struct RolloutOrchestrator<C, A, L> {
    compute: Arc<C>,
    autoscale: Arc<A>,
    load_balancer: Arc<L>,
    cancel: watch::Receiver<bool>,
}

impl<C, A, L> RolloutOrchestrator<C, A, L>
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

    /// Run the whole rollout: discover, prune, create, resize, and — for
    /// blue-green requests — swap production traffic onto the new revision.
    pub async fn setup_and_deploy(
        &self,
        request: &RolloutRequest,
    ) -> RolloutResult<DeploymentResult> {
        validate_request(request)?;

        // ── Discovering ──────────────────────────────────────────────
        let deployment = &request.target.deployment_id;
        info!(%deployment, phase = %RolloutPhase::Discovering, "rollout step starting");

        let discovery = RevisionDiscovery::new(self.compute.clone());
        let revisions = discovery
            .list_revisions(&request.target)
            .await
            .map_err(|e| e.in_phase(RolloutPhase::Discovering))?;
        let next_revision = next_revision_number(&revisions);
        let active = if request.blue_green {
            most_recent_active_or_blue(&revisions)
        } else {
            most_recent_active(&revisions)
        }
        .cloned();
        let new_name = scale_set_name(&request.target.name_prefix, next_revision);

        let snapshot = self
            .capture_snapshot(active.as_ref())
            .await
            .map_err(|e| e.in_phase(RolloutPhase::Discovering))?;
        let base_policies = self
            .autoscale
            .get_policy_documents(&request.base_revision)
            .await
            .map_err(|e| {
                RolloutError::from_provider(&request.base_revision, e)
                    .in_phase(RolloutPhase::Discovering)
            })?;
        let counts = self.effective_counts(request, active.as_ref());
        info!(
            %deployment,
            new_revision = %new_name,
            previous = active.as_ref().map(|r| r.name.as_str()),
            "discovery complete"
        );

        let capacity = self.capacity(request.poll_interval);

        // ── Pruning ──────────────────────────────────────────────────
        let plan = plan_retention(
            &revisions,
            active.as_ref().map(|r| r.name.as_str()),
            request.retention,
        );
        info!(
            %deployment,
            phase = %RolloutPhase::Pruning,
            downsize = plan.downsize.len(),
            delete = plan.delete.len(),
            "rollout step starting"
        );
        RetentionPruner::new(self.compute.clone(), self.autoscale.clone(), capacity.clone())
            .execute(&plan, &revisions, request.steady_state_timeout)
            .await
            .map_err(|e| e.in_phase(RolloutPhase::Pruning))?;
        info!(%deployment, "pruning complete");

        // ── Creating ─────────────────────────────────────────────────
        info!(
            %deployment,
            phase = %RolloutPhase::Creating,
            revision = %new_name,
            base = %request.base_revision,
            "rollout step starting"
        );
        self.create_revision(request, &new_name, next_revision, counts.max)
            .await
            .map_err(|e| e.in_phase(RolloutPhase::Creating))?;
        info!(%deployment, revision = %new_name, "revision created");

        // ── Resizing ─────────────────────────────────────────────────
        info!(%deployment, phase = %RolloutPhase::Resizing, "rollout step starting");
        match request.resize_order {
            ResizeOrder::NewFirst => {
                self.resize_new_revision(&capacity, request, &new_name, counts, &base_policies)
                    .await
                    .map_err(|e| e.in_phase(RolloutPhase::Resizing))?;
                self.downsize_old_revision(&capacity, request, active.as_ref())
                    .await
                    .map_err(|e| e.in_phase(RolloutPhase::Resizing))?;
            }
            ResizeOrder::OldFirst => {
                self.downsize_old_revision(&capacity, request, active.as_ref())
                    .await
                    .map_err(|e| e.in_phase(RolloutPhase::Resizing))?;
                self.resize_new_revision(&capacity, request, &new_name, counts, &base_policies)
                    .await
                    .map_err(|e| e.in_phase(RolloutPhase::Resizing))?;
            }
        }
        info!(%deployment, "resizing complete");

        // ── SwappingRoute ────────────────────────────────────────────
        if request.blue_green {
            info!(%deployment, phase = %RolloutPhase::SwappingRoute, "rollout step starting");
            let params = request
                .blue_green_params
                .as_ref()
                .ok_or_else(missing_blue_green_params)?;
            let swap = SwitchRouteRequest {
                new_revision: new_name.clone(),
                old_revision: active.as_ref().map(|r| r.name.clone()),
                load_balancer: params.load_balancer.clone(),
                stage_pool: params.stage_pool.clone(),
                prod_pool: params.prod_pool.clone(),
                is_rollback: false,
                downscale_old_revision: request.downscale_old_revision,
                snapshot: Some(snapshot.clone()),
                base_scaling_policies: base_policies.clone(),
                steady_state_timeout: request.steady_state_timeout,
                poll_interval: request.poll_interval,
                retry: request.retry,
            };
            self.swap_forward(&swap)
                .await
                .map_err(|e| e.in_phase(RolloutPhase::SwappingRoute))?;
        }

        info!(%deployment, revision = %new_name, phase = %RolloutPhase::Done, "rollout complete");
        Ok(DeploymentResult {
            new_revision: new_name,
            old_revision: active.map(|r| r.name),
            counts,
            snapshot,
            base_scaling_policies: base_policies,
        })
    }

    /// Swap production traffic, or restore the previous revision when
    /// `is_rollback` is set.
    pub async fn switch_route(&self, request: &SwitchRouteRequest) -> RolloutResult<SwitchOutcome> {
        if request.is_rollback {
            let report = RollbackOrchestrator::new(
                self.compute.clone(),
                self.autoscale.clone(),
                self.load_balancer.clone(),
                self.cancel.clone(),
            )
            .roll_back(request)
            .await?;
            Ok(SwitchOutcome::RolledBack(report))
        } else {
            let downscale_skipped = self.swap_forward(request).await?;
            Ok(SwitchOutcome::Switched { downscale_skipped })
        }
    }

    /// Forward half of the swap protocol: stage → production for the new
    /// revision, production → parked for the old one.
    async fn swap_forward(&self, request: &SwitchRouteRequest) -> RolloutResult<Option<String>> {
        let new = request.new_revision.as_str();
        info!(new, old = request.old_revision.as_deref(), "switching production traffic");

        let binder = self.binder(request.retry);
        let capacity = self.capacity(request.poll_interval);

        binder.detach(new, &request.stage_pool).await?;
        binder
            .await_member_refresh(new, request.steady_state_timeout)
            .await?;
        binder
            .attach(new, &request.load_balancer, &request.prod_pool)
            .await?;
        binder
            .await_member_refresh(new, request.steady_state_timeout)
            .await?;

        if !request.base_scaling_policies.is_empty() {
            self.autoscale
                .attach_policy_documents(new, &request.base_scaling_policies)
                .await
                .map_err(|e| RolloutError::from_provider(new, e))?;
        }
        self.tag_bg_state(new, BG_BLUE, request.retry).await?;

        let Some(old) = request.old_revision.as_deref() else {
            let reason = "no previous revision to downscale".to_string();
            info!(new, %reason, "traffic switch complete");
            return Ok(Some(reason));
        };

        binder.detach(old, &request.prod_pool).await?;
        binder
            .await_member_refresh(old, request.steady_state_timeout)
            .await?;
        self.tag_bg_state(old, BG_GREEN, request.retry).await?;

        if request.downscale_old_revision {
            info!(revision = old, "downscaling previous revision to zero");
            self.autoscale
                .clear_policies(old)
                .await
                .map_err(|e| RolloutError::from_provider(old, e))?;
            capacity
                .resize_and_await(old, 0, request.steady_state_timeout)
                .await?;
            info!(new, old, "traffic switch complete");
            Ok(None)
        } else {
            let reason =
                format!("downscale of previous revision {old} skipped: flag disabled");
            info!(new, %reason, "traffic switch complete");
            Ok(Some(reason))
        }
    }

    async fn create_revision(
        &self,
        request: &RolloutRequest,
        new_name: &str,
        revision: u32,
        max_capacity: u32,
    ) -> RolloutResult<()> {
        let base_config = self
            .compute
            .get_group_config(&request.base_revision)
            .await
            .map_err(|e| RolloutError::from_provider(&request.base_revision, e))?;
        let tags = tags_for_new_revision(
            &request.target.deployment_id,
            revision,
            epoch_secs(),
            request.blue_green,
        );
        call_with_retry(request.retry, "create scale set", async || {
            self.compute
                .create_group(new_name, &base_config, max_capacity, tags.clone())
                .await
        })
        .await
        .map_err(|e| RolloutError::from_provider(new_name, e))?;

        // Blue-green revisions are staged behind the stage pool until the
        // swap moves them into production.
        if request.blue_green {
            let params = request
                .blue_green_params
                .as_ref()
                .ok_or_else(missing_blue_green_params)?;
            let binder = self.binder(request.retry);
            binder
                .attach(new_name, &params.load_balancer, &params.stage_pool)
                .await?;
            binder
                .await_member_refresh(new_name, request.steady_state_timeout)
                .await?;
        }
        Ok(())
    }

    async fn resize_new_revision(
        &self,
        capacity: &CapacityController<C>,
        request: &RolloutRequest,
        new_name: &str,
        counts: InstanceCounts,
        base_policies: &[ScalingPolicyDoc],
    ) -> RolloutResult<()> {
        capacity
            .resize_and_await(new_name, counts.desired, request.steady_state_timeout)
            .await?;

        // Attaching the policy below the configured desired capacity would
        // let it override the manual ramp-up.
        if counts.desired >= request.counts.desired {
            if !base_policies.is_empty() {
                info!(revision = new_name, count = base_policies.len(), "attaching base scaling policies");
                self.autoscale
                    .attach_policy_documents(new_name, base_policies)
                    .await
                    .map_err(|e| RolloutError::from_provider(new_name, e))?;
            }
        } else {
            info!(
                revision = new_name,
                current = counts.desired,
                configured = request.counts.desired,
                "skipping scaling-policy attach until the configured desired capacity is reached"
            );
        }
        Ok(())
    }

    async fn downsize_old_revision(
        &self,
        capacity: &CapacityController<C>,
        request: &RolloutRequest,
        active: Option<&ScaleSetRevision>,
    ) -> RolloutResult<()> {
        let Some(old) = active else {
            return Ok(());
        };
        if request.blue_green {
            // The old side keeps serving traffic until SwappingRoute.
            info!(revision = %old.name, "leaving previous revision untouched until the traffic swap");
            return Ok(());
        }
        info!(revision = %old.name, "downsizing previous revision to zero");
        self.autoscale
            .clear_policies(&old.name)
            .await
            .map_err(|e| RolloutError::from_provider(&old.name, e))?;
        capacity
            .resize_and_await(&old.name, 0, request.steady_state_timeout)
            .await
    }

    async fn capture_snapshot(
        &self,
        active: Option<&ScaleSetRevision>,
    ) -> RolloutResult<PreDeploymentSnapshot> {
        let Some(active) = active else {
            return Ok(PreDeploymentSnapshot::empty());
        };
        let scaling_policies = self
            .autoscale
            .get_policy_documents(&active.name)
            .await
            .map_err(|e| RolloutError::from_provider(&active.name, e))?;
        info!(
            revision = %active.name,
            desired = active.capacity,
            min = active.min_capacity,
            policies = scaling_policies.len(),
            "captured pre-deployment snapshot"
        );
        Ok(PreDeploymentSnapshot {
            old_revision: Some(active.name.clone()),
            desired_capacity: active.capacity,
            min_capacity: active.min_capacity,
            scaling_policies,
        })
    }

    fn effective_counts(
        &self,
        request: &RolloutRequest,
        active: Option<&ScaleSetRevision>,
    ) -> InstanceCounts {
        match active {
            Some(rev) if request.use_running_counts => {
                let counts = InstanceCounts {
                    min: rev.min_capacity,
                    max: rev.max_capacity,
                    desired: rev.capacity,
                };
                info!(
                    revision = %rev.name,
                    min = counts.min,
                    max = counts.max,
                    desired = counts.desired,
                    "using currently running instance counts"
                );
                counts
            }
            _ => {
                info!(
                    min = request.counts.min,
                    max = request.counts.max,
                    desired = request.counts.desired,
                    "using requested instance counts"
                );
                request.counts
            }
        }
    }

    async fn tag_bg_state(
        &self,
        revision: &str,
        state: &str,
        retry: RetryPolicy,
    ) -> RolloutResult<()> {
        call_with_retry(retry, "update blue-green tag", async || {
            self.compute.update_tag(revision, BG_STATE_TAG, state).await
        })
        .await
        .map_err(|e| RolloutError::from_provider(revision, e))
    }

    fn capacity(&self, interval: Duration) -> CapacityController<C> {
        CapacityController::new(self.compute.clone(), interval, self.cancel.clone())
    }

    fn binder(&self, retry: RetryPolicy) -> BackendPoolBinder<C, L> {
        BackendPoolBinder::new(
            self.compute.clone(),
            self.load_balancer.clone(),
            retry,
            self.cancel.clone(),
        )
    }
}

fn validate_request(request: &RolloutRequest) -> RolloutResult<()> {
    if request.blue_green && request.blue_green_params.is_none() {
        return Err(missing_blue_green_params());
    }
    if request.counts.desired > request.counts.max {
        return Err(RolloutError::InvalidRequest(format!(
            "desired instance count {} exceeds maximum {}",
            request.counts.desired, request.counts.max
        )));
    }
    if request.counts.min > request.counts.desired {
        return Err(RolloutError::InvalidRequest(format!(
            "minimum instance count {} exceeds desired {}",
            request.counts.min, request.counts.desired
        )));
    }
    Ok(())
}

fn missing_blue_green_params() -> RolloutError {
    RolloutError::InvalidRequest(
        "blue-green rollout requires load-balancer and backend-pool names".to_string(),
    )
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use veer_core::types::DeploymentTarget;

    fn base_request() -> RolloutRequest {
        RolloutRequest {
            target: DeploymentTarget {
                deployment_id: "map-1".to_string(),
                account: "acct".to_string(),
                scope: "rg-1".to_string(),
                name_prefix: "web".to_string(),
            },
            base_revision: "web-base".to_string(),
            counts: InstanceCounts {
                min: 1,
                max: 4,
                desired: 2,
            },
            blue_green: false,
            blue_green_params: None,
            resize_order: ResizeOrder::NewFirst,
            downscale_old_revision: true,
            use_running_counts: false,
            retention: 3,
            steady_state_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn blue_green_without_params_is_invalid() {
        let mut request = base_request();
        request.blue_green = true;
        let err = validate_request(&request).unwrap_err();
        assert!(matches!(err, RolloutError::InvalidRequest(_)));
    }

    #[test]
    fn desired_above_max_is_invalid() {
        let mut request = base_request();
        request.counts.desired = 9;
        assert!(matches!(
            validate_request(&request),
            Err(RolloutError::InvalidRequest(_))
        ));
    }

    #[test]
    fn min_above_desired_is_invalid() {
        let mut request = base_request();
        request.counts.min = 3;
        assert!(matches!(
            validate_request(&request),
            Err(RolloutError::InvalidRequest(_))
        ));
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_request(&base_request()).is_ok());
    }

    #[test]
    fn phase_display_is_lowercase() {
        assert_eq!(RolloutPhase::SwappingRoute.to_string(), "swapping route");
        assert_eq!(RolloutPhase::Discovering.to_string(), "discovering");
    }
}
