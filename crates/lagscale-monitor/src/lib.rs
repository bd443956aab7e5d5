//! lagscale-monitor: the monitoring-and-autoscaling control loop.
//!
//! The [`MonitorSupervisor`] owns a registry of per-(cluster, group)
//! monitoring tasks. Each task runs one tick per interval: read the
//! cluster's lag metrics, persist the worst observed lag, and drive the
//! workload's replica count toward the policy's decision.
//!
//! # Architecture
//!
//! ```text
//! MonitorSupervisor
//!   ├── start()/stop()/delete() ← lifecycle, linearized per key
//!   ├── registry: (cluster_id, group) → task handle + shutdown channel
//!   └── per-monitor loop
//!         └── run_tick(): acquire lag → record → decide → scale
//! ```
//!
//! Transient tick failures (unreachable source, orchestrator errors) are
//! contained within the tick; structural errors (unknown cluster, invalid
//! policy, duplicate start) surface synchronously to the caller.

pub mod error;
pub mod supervisor;
pub mod tick;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{MonitorError, MonitorResult};
pub use supervisor::{ManualScale, MonitorKey, MonitorSupervisor, StartMonitor};
pub use tick::TickOutcome;
