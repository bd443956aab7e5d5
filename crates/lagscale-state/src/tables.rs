//! redb table definitions for the lagscale state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types), except the meta table which holds the id counter. Child tables
//! use composite keys so dependents of a cluster or monitor are one prefix
//! scan away.

use redb::TableDefinition;

/// Cluster configs keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Monitor records keyed by `{monitor_id}`.
pub const MONITORS: TableDefinition<&str, &[u8]> = TableDefinition::new("monitors");

/// Lag history keyed by `{cluster_id}:{group}:{record_id}`.
pub const LAG_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("lag_records");

/// Scaling events keyed by `{monitor_id}:{event_id}`.
pub const SCALING_EVENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("scaling_events");

/// Consumer-group discovery snapshots keyed by `{cluster_id}:{snapshot_id}`.
pub const GROUP_SNAPSHOTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("group_snapshots");

/// Store metadata; holds the monotonic id counter under [`NEXT_ID`].
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Meta key for the next unallocated row id.
pub const NEXT_ID: &str = "next_id";
