//! Veer rollout core — blue-green scale-set orchestration.
//!
//! Creates a new immutable revision of a compute scale set, brings capacity
//! up under a bounded wait, shifts load-balancer traffic onto it, and can
//! restore the previous revision from a captured snapshot.
//!
//! # Components
//!
//! - **`discovery`** — revision listing, numbering, active-revision lookup
//! - **`capacity`** — resize + steady-state wait
//! - **`binder`** — backend-pool attach/detach + member refresh
//! - **`retention`** — downsize/delete revisions beyond the retention count
//! - **`orchestrator`** — the Setup→Deploy→SwitchRoute state machine
//! - **`rollback`** — snapshot-driven restore of the previous revision
//! - **`poll`** — cancellable poll/retry helpers shared by the waits

pub mod binder;
pub mod capacity;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod poll;
pub mod request;
pub mod retention;
pub mod rollback;

pub use binder::BackendPoolBinder;
pub use capacity::CapacityController;
pub use discovery::RevisionDiscovery;
pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{RolloutOrchestrator, RolloutPhase, SwitchOutcome};
pub use request::{
    BlueGreenParams, DeploymentResult, PreDeploymentSnapshot, ResizeOrder, RolloutRequest,
    SwitchRouteRequest,
};
pub use retention::{PrunePlan, RetentionPruner, plan_retention};
pub use rollback::{RollbackOrchestrator, RollbackReport};
