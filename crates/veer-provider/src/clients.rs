//! Client traits for the cloud control plane.
//!
//! Three narrow interfaces, one per provider surface the rollout touches.
//! Implementations are expected to be cheap to clone or share behind `Arc`;
//! every method takes `&self`.

use serde::{Deserialize, Serialize};

use veer_core::tags::TagMap;
use veer_core::types::{MemberInstance, ScaleSetRevision, ScalingPolicyDoc};

use crate::error::ProviderResult;

/// Configuration cloned from a base scale set into a new revision:
/// image reference, SKU, network profile, and auth profile. Carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub image: String,
    pub sku: String,
    pub network_profile: String,
    pub admin_profile: String,
}

/// Handle for an asynchronous resize issued to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeOperation {
    pub id: u64,
    pub group: String,
    pub target_capacity: u32,
}

/// Status of an in-flight resize operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

/// A load balancer and its backend pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub name: String,
    pub backend_pools: Vec<String>,
}

/// Create/read/delete/resize named scale sets and their member instances.
pub trait ComputeGroupClient {
    /// List every scale set in the target scope, tags included. Ownership
    /// filtering happens on the caller side.
    async fn list_groups(&self, scope: &str) -> ProviderResult<Vec<ScaleSetRevision>>;

    /// Fetch one scale set by name.
    async fn get_group(&self, name: &str) -> ProviderResult<ScaleSetRevision>;

    /// Read the cloneable configuration of a scale set.
    async fn get_group_config(&self, name: &str) -> ProviderResult<GroupConfig>;

    /// Create a scale set from a base configuration. New groups start at
    /// capacity zero; capacity is raised separately so the steady-state wait
    /// stays in one place.
    async fn create_group(
        &self,
        name: &str,
        config: &GroupConfig,
        max_capacity: u32,
        tags: TagMap,
    ) -> ProviderResult<()>;

    /// Issue an asynchronous resize. The returned handle is polled via
    /// [`resize_status`](Self::resize_status).
    async fn resize(&self, name: &str, capacity: u32) -> ProviderResult<ResizeOperation>;

    /// Status of a previously issued resize.
    async fn resize_status(&self, op: &ResizeOperation) -> ProviderResult<ResizeStatus>;

    /// Set the minimum capacity without touching desired capacity.
    async fn set_min_capacity(&self, name: &str, min: u32) -> ProviderResult<()>;

    /// Add or overwrite a single tag.
    async fn update_tag(&self, name: &str, key: &str, value: &str) -> ProviderResult<()>;

    /// Delete a scale set outright.
    async fn delete_group(&self, name: &str) -> ProviderResult<()>;

    /// Current member instances with their provisioning states.
    async fn list_member_instances(&self, name: &str) -> ProviderResult<Vec<MemberInstance>>;

    /// Re-apply network configuration to one member instance.
    async fn refresh_member_network_config(
        &self,
        name: &str,
        instance_id: &str,
    ) -> ProviderResult<()>;
}

/// Read/attach/clear the scaling-policy documents bound to a scale set.
pub trait AutoScalePolicyClient {
    async fn get_policy_documents(&self, name: &str) -> ProviderResult<Vec<ScalingPolicyDoc>>;

    async fn attach_policy_documents(
        &self,
        name: &str,
        docs: &[ScalingPolicyDoc],
    ) -> ProviderResult<()>;

    async fn clear_policies(&self, name: &str) -> ProviderResult<()>;
}

/// Attach/detach scale sets to load-balancer backend pools.
pub trait LoadBalancerClient {
    async fn get_by_name(&self, name: &str) -> ProviderResult<LoadBalancer>;

    async fn attach_backend_pool(
        &self,
        group: &str,
        load_balancer: &str,
        pool: &str,
    ) -> ProviderResult<()>;

    async fn detach_backend_pool(&self, group: &str, pool: &str) -> ProviderResult<()>;
}
