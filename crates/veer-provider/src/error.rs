//! Error types for provider client calls.

use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by the cloud control plane.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limiting / throttling. Poll loops retry these until their
    /// overall deadline is spent.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Non-retryable rejection from the provider API.
    #[error("provider error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Whether a retry may succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}
