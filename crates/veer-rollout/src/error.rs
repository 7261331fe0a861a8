//! Rollout error taxonomy.

use std::time::Duration;

use thiserror::Error;

use veer_provider::ProviderError;

use crate::orchestrator::RolloutPhase;

/// Result type alias for rollout operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors surfaced by the rollout core.
///
/// Every variant names the affected revision and the attempted target so the
/// message is actionable without reading provider logs.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("scale set not found: {0}")]
    NotFound(String),

    #[error("timed out after {waited:?} waiting for {waiting_for} on scale set {revision}")]
    Timeout {
        revision: String,
        waiting_for: String,
        waited: Duration,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("resize of scale set {revision} to capacity {target_capacity} failed: {message}")]
    ResizeFailed {
        revision: String,
        target_capacity: u32,
        message: String,
    },

    #[error(
        "{operation} completed on only part of scale set {revision}; failed instances: {failed_instances:?}"
    )]
    PartialFailure {
        revision: String,
        operation: String,
        failed_instances: Vec<String>,
    },

    #[error("cancelled while waiting for {waiting_for} on scale set {revision}")]
    Cancelled {
        revision: String,
        waiting_for: String,
    },

    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("rollout failed during {phase}: {source}")]
    Step {
        phase: RolloutPhase,
        #[source]
        source: Box<RolloutError>,
    },

    #[error("rollback incomplete, {} step(s) failed: [{}]", failures.len(), failures.join("; "))]
    RollbackIncomplete { failures: Vec<String> },
}

impl RolloutError {
    /// Map a provider error, upgrading `NotFound` with the revision name.
    pub fn from_provider(revision: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(_) => RolloutError::NotFound(revision.to_string()),
            other => RolloutError::Provider(other),
        }
    }

    /// Attach the failing phase to an error bubbling out of a rollout step.
    pub fn in_phase(self, phase: RolloutPhase) -> Self {
        RolloutError::Step {
            phase,
            source: Box::new(self),
        }
    }
}
