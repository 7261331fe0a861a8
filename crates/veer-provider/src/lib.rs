//! Veer provider interfaces — the narrow seams to the cloud control plane.
//!
//! The rollout core never talks to a cloud SDK directly; it goes through the
//! three client traits in this crate. Production wires in real SDK-backed
//! implementations, tests wire in [`MemoryCloud`].
//!
//! # Components
//!
//! - **`clients`** — `ComputeGroupClient`, `AutoScalePolicyClient`,
//!   `LoadBalancerClient` traits and their wire types
//! - **`error`** — provider error taxonomy
//! - **`memory`** — in-memory provider with configurable convergence lag

// The orchestration crates stay generic over these traits and never box
// them, so auto-captured futures need no explicit Send bounds.
#![allow(async_fn_in_trait)]

pub mod clients;
pub mod error;
pub mod memory;

pub use clients::{
    AutoScalePolicyClient, ComputeGroupClient, GroupConfig, LoadBalancer, LoadBalancerClient,
    ResizeOperation, ResizeStatus,
};
pub use error::{ProviderError, ProviderResult};
pub use memory::MemoryCloud;
