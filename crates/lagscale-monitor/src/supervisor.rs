//! Lifecycle supervisor for lag monitors.
//!
//! One spawned loop per active (cluster, group) pair. The registry's
//! write lock linearizes lifecycle calls per key, so two concurrent
//! starts for the same pair cannot both win. The lock is never held
//! across a network await; a monitor's first tick runs inside its
//! spawned task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lagscale_exporter::ExporterClient;
use lagscale_orchestrator::{Orchestrator, WorkloadRef};
use lagscale_policy::ScalingPolicyConfig;
use lagscale_state::{
    ClusterId, MonitorId, MonitorRecord, MonitorStatus, NewScalingEvent, StateStore,
};

use crate::error::{MonitorError, MonitorResult};
use crate::tick::{TickContext, run_monitor_loop};

/// Registry key: one monitor per (cluster, group) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    pub cluster_id: ClusterId,
    pub group: String,
}

impl MonitorKey {
    pub fn new(cluster_id: ClusterId, group: impl Into<String>) -> Self {
        Self {
            cluster_id,
            group: group.into(),
        }
    }
}

impl std::fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cluster_id, self.group)
    }
}

/// Parameters for starting a monitor.
#[derive(Debug, Clone)]
pub struct StartMonitor {
    pub cluster_id: ClusterId,
    pub group: String,
    /// Restrict observation to one topic; None watches every topic the
    /// group consumes.
    pub topic: Option<String>,
    pub interval: Duration,
    pub policy: ScalingPolicyConfig,
}

/// Result of a manual scaling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualScale {
    /// False when the workload already ran the requested count.
    pub scaled: bool,
    pub old_replicas: u32,
    pub new_replicas: u32,
}

/// A running monitor's task handle plus its shutdown channel.
struct MonitorSlot {
    record_id: MonitorId,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Owns the registry of running monitors and the shared clients their
/// loops use. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct MonitorSupervisor {
    store: StateStore,
    exporter: ExporterClient,
    orchestrator: Arc<dyn Orchestrator>,
    workload: WorkloadRef,
    monitors: Arc<RwLock<HashMap<MonitorKey, MonitorSlot>>>,
}

impl MonitorSupervisor {
    pub fn new(
        store: StateStore,
        exporter: ExporterClient,
        orchestrator: Arc<dyn Orchestrator>,
        workload: WorkloadRef,
    ) -> Self {
        Self {
            store,
            exporter,
            orchestrator,
            workload,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a monitor for a (cluster, group) pair. Fails if one is
    /// already active for the pair, the policy is invalid, or the
    /// cluster does not exist. The first tick runs immediately in the
    /// spawned loop.
    pub async fn start(&self, params: StartMonitor) -> MonitorResult<MonitorRecord> {
        params.policy.validate()?;

        let key = MonitorKey::new(params.cluster_id, params.group.clone());
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&key) {
            return Err(MonitorError::AlreadyActive(key));
        }
        // A persisted Active row without a registry slot means a prior
        // run died without stopping its monitors. Fail closed rather
        // than double-drive the workload.
        if self
            .store
            .find_active_monitor(params.cluster_id, &params.group)?
            .is_some()
        {
            return Err(MonitorError::AlreadyActive(key));
        }
        if self.store.get_cluster(params.cluster_id)?.is_none() {
            return Err(MonitorError::ClusterNotFound(params.cluster_id));
        }

        let record = self.store.create_monitor(
            params.cluster_id,
            &params.group,
            params.topic.as_deref(),
            &params.policy,
        )?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = TickContext {
            store: self.store.clone(),
            exporter: self.exporter.clone(),
            orchestrator: self.orchestrator.clone(),
            workload: self.workload.clone(),
            monitor: record.clone(),
        };
        let handle = tokio::spawn(run_monitor_loop(ctx, params.interval, shutdown_rx));

        monitors.insert(
            key.clone(),
            MonitorSlot {
                record_id: record.id,
                handle,
                shutdown_tx,
            },
        );
        info!(
            monitor_id = record.id,
            key = %key,
            interval_ms = params.interval.as_millis() as u64,
            "monitor started"
        );
        Ok(record)
    }

    /// Stop the monitor for a (cluster, group) pair and mark its record
    /// Stopped.
    ///
    /// The status write happens under the registry lock, so a concurrent
    /// start for the same key cannot observe a removed slot alongside a
    /// still-Active row.
    pub async fn stop(&self, key: &MonitorKey) -> MonitorResult<MonitorRecord> {
        let mut monitors = self.monitors.write().await;
        let slot = monitors
            .remove(key)
            .ok_or_else(|| MonitorError::NotFound(key.to_string()))?;
        shut_down(&slot);
        let record = self.store.mark_monitor_stopped(slot.record_id)?;
        drop(monitors);
        info!(monitor_id = record.id, key = %key, "monitor stopped");
        Ok(record)
    }

    /// Stop every running monitor for a cluster; returns how many were
    /// stopped. Store failures while marking rows are logged, not
    /// propagated, so one bad row cannot leave later loops running.
    pub async fn stop_all_for_cluster(&self, cluster_id: ClusterId) -> usize {
        let mut monitors = self.monitors.write().await;
        let keys: Vec<MonitorKey> = monitors
            .keys()
            .filter(|k| k.cluster_id == cluster_id)
            .cloned()
            .collect();

        let mut stopped = 0;
        for key in keys {
            let Some(slot) = monitors.remove(&key) else {
                continue;
            };
            shut_down(&slot);
            if let Err(e) = self.store.mark_monitor_stopped(slot.record_id) {
                warn!(error = %e, monitor_id = slot.record_id, key = %key, "stop not recorded");
            }
            stopped += 1;
        }
        drop(monitors);
        if stopped > 0 {
            info!(cluster_id, count = stopped, "cluster monitors stopped");
        }
        stopped
    }

    /// List monitor records, optionally restricted to one cluster.
    /// Includes stopped monitors; the registry only holds running ones.
    pub fn list(&self, cluster_id: Option<ClusterId>) -> MonitorResult<Vec<MonitorRecord>> {
        Ok(self.store.list_monitors(cluster_id)?)
    }

    /// Delete a monitor record and its scaling events. A still-running
    /// monitor is stopped first.
    pub async fn delete(&self, monitor_id: MonitorId) -> MonitorResult<()> {
        let record = self
            .store
            .get_monitor(monitor_id)?
            .ok_or_else(|| MonitorError::NotFound(monitor_id.to_string()))?;

        if record.status == MonitorStatus::Active {
            let key = MonitorKey::new(record.cluster_id, record.group.clone());
            let mut monitors = self.monitors.write().await;
            // Only tear down the slot if it belongs to this record; the
            // pair may have been restarted under a newer id.
            if let Some(slot) = monitors.get(&key) {
                if slot.record_id == monitor_id {
                    if let Some(slot) = monitors.remove(&key) {
                        shut_down(&slot);
                    }
                }
            }
        }

        self.store.delete_monitor_cascade(monitor_id)?;
        info!(monitor_id, "monitor deleted");
        Ok(())
    }

    /// Delete a cluster and everything under it: running monitors are
    /// stopped first, then the store cascade removes monitors, lag
    /// records, scaling events, and group snapshots. Returns false if
    /// the cluster did not exist.
    pub async fn delete_cluster(&self, cluster_id: ClusterId) -> MonitorResult<bool> {
        self.stop_all_for_cluster(cluster_id).await;
        Ok(self.store.delete_cluster_cascade(cluster_id)?)
    }

    /// Re-discover the consumer groups a cluster's metrics source
    /// reports, persist a snapshot, and return the groups.
    pub async fn refresh_groups(&self, cluster_id: ClusterId) -> MonitorResult<Vec<String>> {
        let cluster = self
            .store
            .get_cluster(cluster_id)?
            .ok_or(MonitorError::ClusterNotFound(cluster_id))?;
        let groups = self.exporter.fetch_groups(&cluster.metrics_url).await?;
        self.store.create_group_snapshot(cluster_id, &groups)?;
        info!(cluster_id, count = groups.len(), "group snapshot refreshed");
        Ok(groups)
    }

    /// Scale the workload to an operator-chosen replica count, bypassing
    /// the policy. Recorded as a scaling event with zero lag so the
    /// history shows the intervention.
    pub async fn scale_manual(
        &self,
        monitor_id: MonitorId,
        replicas: u32,
    ) -> MonitorResult<ManualScale> {
        if replicas == 0 {
            return Err(MonitorError::InvalidReplicas(replicas));
        }
        let record = self
            .store
            .get_monitor(monitor_id)?
            .ok_or_else(|| MonitorError::NotFound(monitor_id.to_string()))?;

        let current = self.orchestrator.replicas(&self.workload).await?;
        if current == replicas {
            return Ok(ManualScale {
                scaled: false,
                old_replicas: current,
                new_replicas: replicas,
            });
        }

        self.orchestrator.scale_to(&self.workload, replicas).await?;
        self.store.create_scaling_event(NewScalingEvent {
            monitor_id,
            group: record.group.clone(),
            topic: record.topic.clone().unwrap_or_default(),
            old_replicas: current,
            new_replicas: replicas,
            lag: 0.0,
        })?;
        info!(monitor_id, from = current, to = replicas, "manual scale applied");
        Ok(ManualScale {
            scaled: true,
            old_replicas: current,
            new_replicas: replicas,
        })
    }

    /// Keys of the currently running monitors.
    pub async fn active(&self) -> Vec<MonitorKey> {
        let monitors = self.monitors.read().await;
        let mut keys: Vec<MonitorKey> = monitors.keys().cloned().collect();
        keys.sort_by(|a, b| (a.cluster_id, &a.group).cmp(&(b.cluster_id, &b.group)));
        keys
    }

    /// True if a monitor is running for the pair.
    pub async fn is_active(&self, key: &MonitorKey) -> bool {
        self.monitors.read().await.contains_key(key)
    }
}

/// Signal a loop to stop and abort its task. The watch flag also covers
/// a tick already in flight; the abort covers the sleep.
fn shut_down(slot: &MonitorSlot) {
    let _ = slot.shutdown_tx.send(true);
    slot.handle.abort();
}
