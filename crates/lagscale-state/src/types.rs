//! Domain types for the lagscale state store.
//!
//! These types represent the persisted state of monitored clusters, their
//! monitoring tasks, and the observation/decision history those tasks
//! accumulate. All types are serializable to/from JSON for storage in redb
//! tables.

use lagscale_policy::ScalingPolicyConfig;
use serde::{Deserialize, Serialize};

/// Unique identifier for a monitored cluster.
pub type ClusterId = u64;

/// Unique identifier for a monitor record.
pub type MonitorId = u64;

// ── Cluster ────────────────────────────────────────────────────────

/// One monitored environment: a named cluster and the URL of its
/// lag-metrics exposition endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    pub id: ClusterId,
    pub name: String,
    /// Metrics source URL (the exporter's `/metrics` endpoint).
    pub metrics_url: String,
    /// Unix timestamp (milliseconds) when the cluster was registered.
    pub created_at: u64,
}

// ── Monitor ────────────────────────────────────────────────────────

/// Lifecycle status of a monitor record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Active,
    Stopped,
}

/// One running or historical monitoring task for a (cluster, group) pair.
///
/// `Stopped` is terminal for a record; restarting the same group creates a
/// fresh record with a new id. At most one `Active` record exists per
/// (cluster_id, group) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorRecord {
    pub id: MonitorId,
    pub cluster_id: ClusterId,
    pub group: String,
    /// Optional topic filter; `None` monitors every topic of the group.
    pub topic: Option<String>,
    pub status: MonitorStatus,
    pub started_at: u64,
    pub stopped_at: Option<u64>,
    /// Policy snapshotted at start time.
    pub policy: ScalingPolicyConfig,
}

// ── History ────────────────────────────────────────────────────────

/// One persisted lag observation: the maximum lag seen in a single tick.
/// Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LagRecord {
    pub id: u64,
    pub cluster_id: ClusterId,
    pub group: String,
    pub topic: String,
    pub lag: f64,
    pub timestamp: u64,
}

/// One replica-count change applied by a monitor (or a manual scale).
/// Written only when the count actually changed. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub id: u64,
    pub monitor_id: MonitorId,
    pub group: String,
    pub topic: String,
    pub old_replicas: u32,
    pub new_replicas: u32,
    /// Lag that triggered the change; 0 for manual scaling.
    pub lag: f64,
    pub timestamp: u64,
}

/// Fields of a [`ScalingEvent`] supplied by the caller; id and timestamp
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewScalingEvent {
    pub monitor_id: MonitorId,
    pub group: String,
    pub topic: String,
    pub old_replicas: u32,
    pub new_replicas: u32,
    pub lag: f64,
}

// ── Discovery ──────────────────────────────────────────────────────

/// Consumer groups a cluster's exporter reported at one discovery pass.
/// The latest snapshot per cluster is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSnapshot {
    pub id: u64,
    pub cluster_id: ClusterId,
    pub groups: Vec<String>,
    pub created_at: u64,
}
