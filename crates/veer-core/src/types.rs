//! Shared types used across Veer crates.

use serde::{Deserialize, Serialize};

use crate::tags::TagMap;

/// Identifies one rollout target: the stable identity a family of scale-set
/// revisions belongs to, across accounts and regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Stable infra-mapping identifier. This is the ownership key carried in
    /// every revision's tags; it never changes across rollouts.
    pub deployment_id: String,
    /// Subscription or account the scale sets live in.
    pub account: String,
    /// Resource group / region scope.
    pub scope: String,
    /// Name prefix shared by all revisions (`<prefix>__<revision>`).
    pub name_prefix: String,
}

/// One concrete compute scale set: a single immutable revision of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSetRevision {
    /// Full scale-set name, `<prefix>__<revision>`.
    pub name: String,
    /// Monotonically increasing revision number, unique per target.
    pub revision: u32,
    /// Current desired capacity.
    pub capacity: u32,
    /// Current minimum capacity.
    pub min_capacity: u32,
    /// Current maximum capacity.
    pub max_capacity: u32,
    /// Creation time, epoch seconds. Mirrored in the tags for sorting.
    pub created_at: u64,
    /// Free-form provider tags. Always carries the ownership tag.
    pub tags: TagMap,
}

impl ScaleSetRevision {
    /// Whether this revision currently holds any capacity.
    pub fn is_active(&self) -> bool {
        self.capacity > 0
    }
}

/// Desired/min/max instance counts for a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceCounts {
    pub min: u32,
    pub max: u32,
    pub desired: u32,
}

/// Provisioning state of a single member instance, as reported by the
/// provider control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Instance is being created.
    Creating,
    /// Instance configuration is being updated.
    Updating,
    /// Terminal: instance provisioned successfully.
    Succeeded,
    /// Terminal: instance provisioned from a specialized image.
    Specialized,
    /// Instance provisioning failed.
    Failed,
    /// Instance is being torn down.
    Deleting,
}

impl ProvisioningState {
    /// Terminal states count toward steady state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Specialized)
    }
}

/// A member instance of a scale set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInstance {
    pub id: String,
    pub state: ProvisioningState,
}

/// An auto-scaling policy document, carried verbatim.
///
/// The controller never interprets the contents; it only detaches, snapshots,
/// and re-attaches them, so the body stays an opaque JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicyDoc(pub serde_json::Value);
