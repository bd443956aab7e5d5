//! Error types for monitor lifecycle operations.
//!
//! These are the errors a caller of Start/Stop/Delete sees. Failures that
//! happen inside a tick never surface here; the tick logs, skips, and the
//! timer continues (see [`crate::tick::TickOutcome`]).

use thiserror::Error;

use lagscale_exporter::ExporterError;
use lagscale_orchestrator::OrchestratorError;
use lagscale_policy::PolicyError;
use lagscale_state::StateError;

use crate::supervisor::MonitorKey;

/// Result type alias for supervisor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;

/// Errors returned by supervisor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A monitor for this (cluster, group) key is already running.
    /// Start does not implicitly restart; the caller must stop first.
    #[error("monitor already active for {0}")]
    AlreadyActive(MonitorKey),

    #[error("monitor not found: {0}")]
    NotFound(String),

    #[error("cluster not found: {0}")]
    ClusterNotFound(u64),

    #[error("replica count must be at least 1, got {0}")]
    InvalidReplicas(u32),

    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),

    #[error(transparent)]
    State(#[from] StateError),

    /// Discovery and manual paths only; tick-path exporter failures are
    /// contained in the tick.
    #[error(transparent)]
    Exporter(#[from] ExporterError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}
