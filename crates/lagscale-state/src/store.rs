//! StateStore, redb-backed persistence for lagscale.
//!
//! Typed CRUD over clusters, monitors, lag history, scaling events, and
//! consumer-group snapshots. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! Cascade deletes (monitor + dependents, cluster + everything) each run
//! inside a single write transaction so a crash can never leave orphan
//! history rows behind.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

use lagscale_policy::ScalingPolicyConfig;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Current unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(MONITORS).map_err(map_err!(Table))?;
        txn.open_table(LAG_RECORDS).map_err(map_err!(Table))?;
        txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(GROUP_SNAPSHOTS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Register a cluster. The id is allocated by the store.
    pub fn create_cluster(&self, name: &str, metrics_url: &str) -> StateResult<ClusterConfig> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let cluster = {
            let id = alloc_id(&txn)?;
            let cluster = ClusterConfig {
                id,
                name: name.to_string(),
                metrics_url: metrics_url.to_string(),
                created_at: now_ms(),
            };
            let key = id.to_string();
            let value = serde_json::to_vec(&cluster).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            cluster
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = cluster.id, %name, "cluster registered");
        Ok(cluster)
    }

    /// Get a cluster by id.
    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<ClusterConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all registered clusters, ordered by id.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        let mut results: Vec<ClusterConfig> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        results.sort_by_key(|c| c.id);
        Ok(results)
    }

    /// Delete a cluster and every dependent row (lag history, group
    /// snapshots, the cluster's monitor records, and those monitors'
    /// scaling events) in one transaction. Returns false if the cluster
    /// did not exist.
    pub fn delete_cluster_cascade(&self, id: ClusterId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let cluster_key = id.to_string();
        {
            let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            if table
                .get(cluster_key.as_str())
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Ok(false);
            }
        }

        // Gather the cluster's monitor ids for the event cascade.
        let monitor_keys: Vec<String> = {
            let table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            scan_monitors(&table, Some(id))?
                .into_iter()
                .map(|m| m.id.to_string())
                .collect()
        };

        let child_prefix = format!("{id}:");
        {
            let mut table = txn.open_table(LAG_RECORDS).map_err(map_err!(Table))?;
            remove_prefix(&mut table, &child_prefix)?;
        }
        {
            let mut table = txn.open_table(GROUP_SNAPSHOTS).map_err(map_err!(Table))?;
            remove_prefix(&mut table, &child_prefix)?;
        }
        {
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            for monitor_key in &monitor_keys {
                remove_prefix(&mut table, &format!("{monitor_key}:"))?;
            }
        }
        {
            let mut table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            for monitor_key in &monitor_keys {
                table
                    .remove(monitor_key.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            table.remove(cluster_key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(cluster_id = id, monitors = monitor_keys.len(), "cluster deleted");
        Ok(true)
    }

    // ── Monitors ───────────────────────────────────────────────────

    /// Persist a new Active monitor record with the policy snapshotted.
    pub fn create_monitor(
        &self,
        cluster_id: ClusterId,
        group: &str,
        topic: Option<&str>,
        policy: &ScalingPolicyConfig,
    ) -> StateResult<MonitorRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let id = alloc_id(&txn)?;
            let record = MonitorRecord {
                id,
                cluster_id,
                group: group.to_string(),
                topic: topic.map(str::to_string),
                status: MonitorStatus::Active,
                started_at: now_ms(),
                stopped_at: None,
                policy: policy.clone(),
            };
            let key = id.to_string();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = record.id, cluster_id, %group, "monitor record created");
        Ok(record)
    }

    /// Get a monitor record by id.
    pub fn get_monitor(&self, id: MonitorId) -> StateResult<Option<MonitorRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
        match table.get(id.to_string().as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List monitor records, optionally restricted to one cluster,
    /// ordered by id.
    pub fn list_monitors(&self, cluster_id: Option<ClusterId>) -> StateResult<Vec<MonitorRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
        let mut results = scan_monitors(&table, cluster_id)?;
        results.sort_by_key(|m| m.id);
        Ok(results)
    }

    /// Find the Active monitor record for a (cluster, group) pair, if any.
    pub fn find_active_monitor(
        &self,
        cluster_id: ClusterId,
        group: &str,
    ) -> StateResult<Option<MonitorRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
        let monitors = scan_monitors(&table, Some(cluster_id))?;
        Ok(monitors
            .into_iter()
            .find(|m| m.status == MonitorStatus::Active && m.group == group))
    }

    /// Transition a monitor record to Stopped with `stopped_at` set.
    ///
    /// Returns the updated record; `NotFound` if the id does not exist.
    pub fn mark_monitor_stopped(&self, id: MonitorId) -> StateResult<MonitorRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let key = id.to_string();
            let mut table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            let bytes = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => guard.value().to_vec(),
                None => return Err(StateError::NotFound(format!("monitor {id}"))),
            };
            let mut record: MonitorRecord = decode(&bytes)?;
            record.status = MonitorStatus::Stopped;
            record.stopped_at = Some(now_ms());
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = id, "monitor record stopped");
        Ok(record)
    }

    /// Delete a monitor record together with its lag history (matched by
    /// cluster + group) and scaling events, in one transaction. Returns
    /// false if the id did not exist.
    pub fn delete_monitor_cascade(&self, id: MonitorId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let monitor_key = id.to_string();
        let record: MonitorRecord = {
            let table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            match table.get(monitor_key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Ok(false),
            }
        };

        {
            // Lag rows are keyed by cluster, so match the group on the
            // decoded row rather than trusting the key shape.
            let mut table = txn.open_table(LAG_RECORDS).map_err(map_err!(Table))?;
            let prefix = format!("{}:", record.cluster_id);
            let keys: Vec<String> = {
                let mut matched = Vec::new();
                for entry in table.iter().map_err(map_err!(Read))? {
                    let (key, value) = entry.map_err(map_err!(Read))?;
                    if !key.value().starts_with(&prefix) {
                        continue;
                    }
                    let row: LagRecord = decode(value.value())?;
                    if row.group == record.group {
                        matched.push(key.value().to_string());
                    }
                }
                matched
            };
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            remove_prefix(&mut table, &format!("{id}:"))?;
        }
        {
            let mut table = txn.open_table(MONITORS).map_err(map_err!(Table))?;
            table.remove(monitor_key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = id, "monitor deleted with dependents");
        Ok(true)
    }

    // ── Lag history ────────────────────────────────────────────────

    /// Append one lag observation.
    pub fn create_lag_record(
        &self,
        cluster_id: ClusterId,
        group: &str,
        topic: &str,
        lag: f64,
    ) -> StateResult<LagRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let id = alloc_id(&txn)?;
            let record = LagRecord {
                id,
                cluster_id,
                group: group.to_string(),
                topic: topic.to_string(),
                lag,
                timestamp: now_ms(),
            };
            let key = format!("{cluster_id}:{group}:{id}");
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(LAG_RECORDS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// List a cluster's lag history, optionally restricted to one group,
    /// ordered by id (insertion order).
    pub fn list_lag_records(
        &self,
        cluster_id: ClusterId,
        group: Option<&str>,
    ) -> StateResult<Vec<LagRecord>> {
        let prefix = format!("{cluster_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LAG_RECORDS).map_err(map_err!(Table))?;
        let mut results: Vec<LagRecord> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let row: LagRecord = decode(value.value())?;
            if group.is_none() || group == Some(row.group.as_str()) {
                results.push(row);
            }
        }
        results.sort_by_key(|r| r.id);
        Ok(results)
    }

    // ── Scaling events ─────────────────────────────────────────────

    /// Append one scaling event.
    pub fn create_scaling_event(&self, new: NewScalingEvent) -> StateResult<ScalingEvent> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let event = {
            let id = alloc_id(&txn)?;
            let event = ScalingEvent {
                id,
                monitor_id: new.monitor_id,
                group: new.group,
                topic: new.topic,
                old_replicas: new.old_replicas,
                new_replicas: new.new_replicas,
                lag: new.lag,
                timestamp: now_ms(),
            };
            let key = format!("{}:{id}", event.monitor_id);
            let value = serde_json::to_vec(&event).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            event
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(event)
    }

    /// The most recent scaling event for a monitor (cooldown anchor).
    pub fn latest_scaling_event(&self, monitor_id: MonitorId) -> StateResult<Option<ScalingEvent>> {
        let events = self.list_scaling_events(monitor_id)?;
        Ok(events.into_iter().max_by_key(|e| e.id))
    }

    /// List a monitor's scaling events ordered by id (insertion order).
    pub fn list_scaling_events(&self, monitor_id: MonitorId) -> StateResult<Vec<ScalingEvent>> {
        let prefix = format!("{monitor_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        let mut results: Vec<ScalingEvent> = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                results.push(decode(value.value())?);
            }
        }
        results.sort_by_key(|e| e.id);
        Ok(results)
    }

    // ── Group snapshots ────────────────────────────────────────────

    /// Persist a consumer-group discovery snapshot for a cluster.
    pub fn create_group_snapshot(
        &self,
        cluster_id: ClusterId,
        groups: &[String],
    ) -> StateResult<GroupSnapshot> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let snapshot = {
            let id = alloc_id(&txn)?;
            let snapshot = GroupSnapshot {
                id,
                cluster_id,
                groups: groups.to_vec(),
                created_at: now_ms(),
            };
            let key = format!("{cluster_id}:{id}");
            let value = serde_json::to_vec(&snapshot).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(GROUP_SNAPSHOTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            snapshot
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(snapshot)
    }

    /// The most recent discovery snapshot for a cluster.
    pub fn latest_group_snapshot(&self, cluster_id: ClusterId) -> StateResult<Option<GroupSnapshot>> {
        let prefix = format!("{cluster_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(GROUP_SNAPSHOTS).map_err(map_err!(Table))?;
        let mut latest: Option<GroupSnapshot> = None;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            let snapshot: GroupSnapshot = decode(value.value())?;
            if latest.as_ref().is_none_or(|l| snapshot.id > l.id) {
                latest = Some(snapshot);
            }
        }
        Ok(latest)
    }
}

/// Allocate the next row id, bumping the meta counter inside `txn`.
fn alloc_id(txn: &redb::WriteTransaction) -> StateResult<u64> {
    let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
    let next = meta
        .get(NEXT_ID)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(1);
    meta.insert(NEXT_ID, next + 1).map_err(map_err!(Write))?;
    Ok(next)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Scan the monitors table, optionally restricted to one cluster.
fn scan_monitors(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    cluster_id: Option<ClusterId>,
) -> StateResult<Vec<MonitorRecord>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let record: MonitorRecord = decode(value.value())?;
        if cluster_id.is_none() || cluster_id == Some(record.cluster_id) {
            results.push(record);
        }
    }
    Ok(results)
}

/// Remove every key starting with `prefix`. Returns the number removed.
fn remove_prefix(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StateResult<u32> {
    let keys: Vec<String> = {
        let mut matched = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                matched.push(key.value().to_string());
            }
        }
        matched
    };
    let count = keys.len() as u32;
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(count)
}
