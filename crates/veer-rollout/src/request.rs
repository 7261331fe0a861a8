//! Rollout request/response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use veer_core::retry::RetryPolicy;
use veer_core::types::{DeploymentTarget, InstanceCounts, ScalingPolicyDoc};

/// Which side gets resized first during the Resizing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeOrder {
    /// Bring the new revision up before the old one comes down. Default.
    #[default]
    NewFirst,
    /// Drain the old revision before the new one comes up.
    OldFirst,
}

/// Load-balancer wiring for a blue-green rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlueGreenParams {
    pub load_balancer: String,
    /// Pool the new revision is staged into before the swap.
    pub stage_pool: String,
    /// Pool serving production traffic.
    pub prod_pool: String,
}

/// Immutable input for one rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutRequest {
    pub target: DeploymentTarget,
    /// Existing scale set whose configuration the new revision clones.
    pub base_revision: String,
    pub counts: InstanceCounts,
    pub blue_green: bool,
    /// Required when `blue_green` is set; validated before any mutating call.
    pub blue_green_params: Option<BlueGreenParams>,
    pub resize_order: ResizeOrder,
    /// Whether the traffic swap downsizes the old revision to zero.
    pub downscale_old_revision: bool,
    /// Inherit min/max/desired from the currently active revision instead of
    /// `counts`, when one exists.
    pub use_running_counts: bool,
    /// Revisions to keep besides the active one; `<= 0` behaves as 1.
    pub retention: i32,
    /// Overall budget for each steady-state wait.
    pub steady_state_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// State of the previously active revision, captured before any traffic
/// moves. Sufficient to restore it on rollback without re-reading provider
/// state that the rollout may already have mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreDeploymentSnapshot {
    /// `None` when the rollout found no active revision (first deployment).
    pub old_revision: Option<String>,
    pub desired_capacity: u32,
    pub min_capacity: u32,
    /// Scaling-policy documents, verbatim.
    pub scaling_policies: Vec<ScalingPolicyDoc>,
}

impl PreDeploymentSnapshot {
    /// Snapshot for a first deployment with nothing to restore.
    pub fn empty() -> Self {
        Self {
            old_revision: None,
            desired_capacity: 0,
            min_capacity: 0,
            scaling_policies: Vec::new(),
        }
    }
}

/// Input for a traffic swap or its rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchRouteRequest {
    pub new_revision: String,
    pub old_revision: Option<String>,
    pub load_balancer: String,
    pub stage_pool: String,
    pub prod_pool: String,
    pub is_rollback: bool,
    pub downscale_old_revision: bool,
    /// Required when `is_rollback` is set.
    pub snapshot: Option<PreDeploymentSnapshot>,
    /// Policies re-attached to the new revision once it serves production.
    pub base_scaling_policies: Vec<ScalingPolicyDoc>,
    pub steady_state_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

/// What `setup_and_deploy` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub new_revision: String,
    pub old_revision: Option<String>,
    /// The counts actually applied (request counts, or running counts when
    /// inherited).
    pub counts: InstanceCounts,
    pub snapshot: PreDeploymentSnapshot,
    /// Scaling-policy documents read from the base revision, for the caller
    /// to attach once steady state is reached.
    pub base_scaling_policies: Vec<ScalingPolicyDoc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_order_defaults_to_new_first() {
        assert_eq!(ResizeOrder::default(), ResizeOrder::NewFirst);
    }

    #[test]
    fn empty_snapshot_has_nothing_to_restore() {
        let snap = PreDeploymentSnapshot::empty();
        assert!(snap.old_revision.is_none());
        assert_eq!(snap.desired_capacity, 0);
        assert!(snap.scaling_policies.is_empty());
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let snap = PreDeploymentSnapshot {
            old_revision: Some("web__4".to_string()),
            desired_capacity: 2,
            min_capacity: 1,
            scaling_policies: vec![ScalingPolicyDoc(serde_json::json!({"target": 60}))],
        };
        let json = serde_json::to_string(&snap).unwrap();
        let back: PreDeploymentSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }
}
