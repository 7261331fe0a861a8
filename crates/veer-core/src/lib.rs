//! Veer core types — deployment identity, revision model, tags, retry policy.
//!
//! Everything a rollout needs to describe *what* it is operating on, kept
//! independent of any concrete cloud provider:
//!
//! - **`types`** — DeploymentTarget, ScaleSetRevision, member instances
//! - **`tags`** — tag conventions, ownership filtering, revision naming
//! - **`retry`** — explicit retry policy with exponential backoff

pub mod retry;
pub mod tags;
pub mod types;

pub use retry::RetryPolicy;
pub use tags::{TagMap, belongs_to, revision_from_tags, scale_set_name};
pub use types::{
    DeploymentTarget, InstanceCounts, MemberInstance, ProvisioningState, ScaleSetRevision,
    ScalingPolicyDoc,
};
