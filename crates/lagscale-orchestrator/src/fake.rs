//! In-memory orchestrator for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::{Orchestrator, WorkloadRef};

/// An in-memory [`Orchestrator`] holding one replica count and a log of
/// applied scalings. Can be armed to fail, for exercising the
/// scaling-abandoned path.
#[derive(Debug, Default)]
pub struct FakeOrchestrator {
    replicas: Mutex<u32>,
    scalings: Mutex<Vec<(String, u32)>>,
    failing: AtomicBool,
}

impl FakeOrchestrator {
    pub fn new(initial_replicas: u32) -> Self {
        Self {
            replicas: Mutex::new(initial_replicas),
            scalings: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Current replica count.
    pub fn current(&self) -> u32 {
        *self.replicas.lock().unwrap()
    }

    /// Every `scale_to` applied so far, as (workload, replicas) pairs.
    pub fn scalings(&self) -> Vec<(String, u32)> {
        self.scalings.lock().unwrap().clone()
    }

    fn check_failing(&self) -> OrchestratorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Unreachable(
                "fake orchestrator armed to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn replicas(&self, _workload: &WorkloadRef) -> OrchestratorResult<u32> {
        self.check_failing()?;
        Ok(self.current())
    }

    async fn scale_to(&self, workload: &WorkloadRef, replicas: u32) -> OrchestratorResult<()> {
        self.check_failing()?;
        *self.replicas.lock().unwrap() = replicas;
        self.scalings
            .lock()
            .unwrap()
            .push((workload.to_string(), replicas));
        Ok(())
    }
}
