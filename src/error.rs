use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendError;

/// Engine-level failure surfaced to the caller of a mutation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any state change.
    #[error("invalid bookmark: {reason}")]
    Validation { reason: &'static str },

    /// The backend call failed; the compensating merge has already run.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend call did not settle in time; treated like a failure.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// Mutations require a signed-in user.
    #[error("no signed-in user")]
    NoSession,
}

impl EngineError {
    /// True when re-attempting the same action unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Backend(_) | EngineError::Timeout(_))
    }
}
