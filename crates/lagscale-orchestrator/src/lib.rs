//! lagscale-orchestrator: the workload-scaling capability contract.
//!
//! The monitor core needs exactly two things from the orchestrator that
//! runs the consumer workload: read the current desired replica count, and
//! set a new one. [`Orchestrator`] is that contract; [`HttpOrchestrator`]
//! speaks it against a Kubernetes-style scale subresource, and
//! [`FakeOrchestrator`] is an in-memory stand-in for tests.
//!
//! Orchestrator failures are non-fatal to a monitor tick: the supervisor
//! logs them and abandons the scaling action for that tick only.

pub mod error;
pub mod fake;
pub mod http_client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::{OrchestratorError, OrchestratorResult};
pub use fake::FakeOrchestrator;
pub use http_client::HttpOrchestrator;

/// Names the workload whose replica count is being driven.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub deployment: String,
}

impl WorkloadRef {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.deployment)
    }
}

/// Capability contract over the workload orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Current desired replica count of the workload.
    async fn replicas(&self, workload: &WorkloadRef) -> OrchestratorResult<u32>;

    /// Set the desired replica count of the workload.
    async fn scale_to(&self, workload: &WorkloadRef, replicas: u32) -> OrchestratorResult<()>;
}
