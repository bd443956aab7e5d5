//! Error types for orchestrator calls.

use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Errors from the workload orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator unreachable: {0}")]
    Unreachable(String),

    #[error("orchestrator api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected orchestrator response: {0}")]
    Protocol(String),
}
