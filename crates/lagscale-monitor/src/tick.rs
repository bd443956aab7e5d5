//! One execution of a monitor's observe-and-decide cycle.
//!
//! A tick runs to completion before its monitor's next interval starts,
//! so the ticks of one monitor never overlap. Every failure kind maps to
//! a named [`TickOutcome`] branch: transient ones skip the tick and the
//! timer continues.
//!
//! Ordering inside a tick: the LagRecord for an observation is persisted
//! before the scaling decision acts on the orchestrator. If the monitor
//! is stopped while a tick is in flight, the shutdown flag is re-checked
//! at each boundary and the tick's remaining effects are discarded.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use lagscale_exporter::{ExporterClient, LagSample};
use lagscale_orchestrator::{Orchestrator, WorkloadRef};
use lagscale_policy::{cooldown_active, decide};
use lagscale_state::{MonitorRecord, NewScalingEvent, StateStore, now_ms};

/// Everything one monitor's loop needs, captured at start time.
///
/// The MonitorRecord (and the policy inside it) is the start-time
/// snapshot; only the cluster's source URL is re-resolved on every tick.
pub(crate) struct TickContext {
    pub(crate) store: StateStore,
    pub(crate) exporter: ExporterClient,
    pub(crate) orchestrator: Arc<dyn Orchestrator>,
    pub(crate) workload: WorkloadRef,
    pub(crate) monitor: MonitorRecord,
}

/// How a single tick ended. Each failure path is a named branch so tests
/// can assert on it.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The monitor's cluster config is gone; stale configuration, skipped.
    ClusterMissing,
    /// The metrics source could not be read; skipped, retried next tick.
    SourceUnreachable,
    /// No sample matched the group/topic filter; nothing written.
    NoSamples,
    /// The monitor was stopped mid-tick; remaining effects discarded.
    Cancelled,
    /// A store write failed; logged, nothing further attempted this tick.
    StoreFailed,
    /// Lag recorded, but the cooldown window since the last scaling
    /// action is still open.
    CooldownHeld { lag: f64 },
    /// Lag recorded; the workload already runs the decided replica count.
    Observed { lag: f64, replicas: u32 },
    /// Lag recorded, but the orchestrator call failed; scaling abandoned
    /// for this tick.
    ScaleFailed { lag: f64 },
    /// Lag recorded and the workload scaled.
    Scaled { lag: f64, from: u32, to: u32 },
}

/// The per-monitor loop: immediate first tick, then one tick per interval
/// until the shutdown channel fires.
pub(crate) async fn run_monitor_loop(
    ctx: TickContext,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(
        monitor_id = ctx.monitor.id,
        group = %ctx.monitor.group,
        interval_ms = interval.as_millis() as u64,
        "monitor loop starting"
    );

    loop {
        let outcome = run_tick(&ctx, &shutdown).await;
        debug!(monitor_id = ctx.monitor.id, ?outcome, "tick complete");
        if outcome == TickOutcome::Cancelled {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!(monitor_id = ctx.monitor.id, "monitor loop shutting down");
                break;
            }
        }
    }
}

/// Run one tick: acquire lag, record the worst sample, decide, scale.
pub(crate) async fn run_tick(ctx: &TickContext, shutdown: &watch::Receiver<bool>) -> TickOutcome {
    let monitor = &ctx.monitor;

    // (a) Re-resolve the cluster's source URL; a deleted cluster is stale
    // configuration, not a reason to kill the loop.
    let cluster = match ctx.store.get_cluster(monitor.cluster_id) {
        Ok(Some(cluster)) => cluster,
        Ok(None) => {
            warn!(
                cluster_id = monitor.cluster_id,
                group = %monitor.group,
                "cluster config missing, tick skipped"
            );
            return TickOutcome::ClusterMissing;
        }
        Err(e) => {
            error!(error = %e, cluster_id = monitor.cluster_id, "cluster lookup failed, tick skipped");
            return TickOutcome::StoreFailed;
        }
    };

    // (b) Acquire lag samples. Transient: skip, the timer continues.
    let samples = match ctx
        .exporter
        .fetch_lag(&cluster.metrics_url, &monitor.group, monitor.topic.as_deref())
        .await
    {
        Ok(samples) => samples,
        Err(e) => {
            debug!(
                error = %e,
                url = %cluster.metrics_url,
                group = %monitor.group,
                "lag acquisition failed, tick skipped"
            );
            return TickOutcome::SourceUnreachable;
        }
    };

    // (c) Worst-case lag wins; ties keep the first-seen sample.
    let mut worst: Option<&LagSample> = None;
    for sample in &samples {
        if worst.is_none_or(|w| sample.lag > w.lag) {
            worst = Some(sample);
        }
    }
    let Some(worst) = worst else {
        return TickOutcome::NoSamples;
    };

    if stopped(shutdown) {
        return TickOutcome::Cancelled;
    }
    let lag_record = match ctx.store.create_lag_record(
        monitor.cluster_id,
        &monitor.group,
        &worst.topic,
        worst.lag,
    ) {
        Ok(record) => record,
        Err(e) => {
            error!(error = %e, group = %monitor.group, "lag record not persisted, tick skipped");
            return TickOutcome::StoreFailed;
        }
    };
    debug!(
        lag_record_id = lag_record.id,
        lag = worst.lag,
        topic = %worst.topic,
        "lag recorded"
    );

    // (d) Cooldown is anchored on the latest persisted scaling event.
    match ctx.store.latest_scaling_event(monitor.id) {
        Ok(Some(event)) if cooldown_active(event.timestamp, now_ms(), &monitor.policy) => {
            debug!(monitor_id = monitor.id, "cooldown active, scaling deferred");
            return TickOutcome::CooldownHeld { lag: worst.lag };
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, monitor_id = monitor.id, "cooldown lookup failed, scaling deferred");
            return TickOutcome::StoreFailed;
        }
    }

    // (e) Decide and, when the count differs, act.
    if stopped(shutdown) {
        return TickOutcome::Cancelled;
    }
    let current = match ctx.orchestrator.replicas(&ctx.workload).await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, workload = %ctx.workload, "replica read failed, scaling abandoned");
            return TickOutcome::ScaleFailed { lag: worst.lag };
        }
    };
    let target = decide(worst.lag, &monitor.policy);
    if target == current {
        return TickOutcome::Observed {
            lag: worst.lag,
            replicas: current,
        };
    }

    if stopped(shutdown) {
        return TickOutcome::Cancelled;
    }
    if let Err(e) = ctx.orchestrator.scale_to(&ctx.workload, target).await {
        warn!(
            error = %e,
            workload = %ctx.workload,
            target,
            "scaling call failed, abandoned for this tick"
        );
        return TickOutcome::ScaleFailed { lag: worst.lag };
    }
    if let Err(e) = ctx.store.create_scaling_event(NewScalingEvent {
        monitor_id: monitor.id,
        group: monitor.group.clone(),
        topic: worst.topic.clone(),
        old_replicas: current,
        new_replicas: target,
        lag: worst.lag,
    }) {
        error!(error = %e, monitor_id = monitor.id, "scaling event not recorded");
        return TickOutcome::StoreFailed;
    }

    info!(
        monitor_id = monitor.id,
        group = %monitor.group,
        lag = worst.lag,
        from = current,
        to = target,
        "workload scaled"
    );
    TickOutcome::Scaled {
        lag: worst.lag,
        from: current,
        to: target,
    }
}

fn stopped(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::spawn_metrics_stub;
    use lagscale_orchestrator::FakeOrchestrator;
    use lagscale_policy::ScalingPolicyConfig;
    use std::time::Duration;

    fn policy(cooldown_ms: u64) -> ScalingPolicyConfig {
        ScalingPolicyConfig {
            cooldown_ms,
            ..Default::default()
        }
    }

    struct Fixture {
        store: StateStore,
        orchestrator: Arc<FakeOrchestrator>,
        ctx: TickContext,
        shutdown_tx: watch::Sender<bool>,
        shutdown_rx: watch::Receiver<bool>,
    }

    /// Build a tick fixture: one cluster pointing at `metrics_url`, one
    /// active monitor for `group`, and a fake orchestrator.
    fn fixture(
        metrics_url: &str,
        group: &str,
        cfg: ScalingPolicyConfig,
        initial_replicas: u32,
    ) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let cluster = store.create_cluster("test", metrics_url).unwrap();
        let monitor = store.create_monitor(cluster.id, group, None, &cfg).unwrap();
        let orchestrator = Arc::new(FakeOrchestrator::new(initial_replicas));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = TickContext {
            store: store.clone(),
            exporter: ExporterClient::new(Duration::from_millis(500)),
            orchestrator: orchestrator.clone(),
            workload: WorkloadRef::new("default", "kafka-consumer"),
            monitor,
        };
        Fixture {
            store,
            orchestrator,
            ctx,
            shutdown_tx,
            shutdown_rx,
        }
    }

    #[tokio::test]
    async fn missing_cluster_skips_tick() {
        let f = fixture("http://127.0.0.1:1/metrics", "g1", policy(0), 1);
        f.store.delete_cluster_cascade(f.ctx.monitor.cluster_id).unwrap();
        // Cascade removed the monitor row too; the in-flight context still
        // carries its snapshot, which is exactly the stale case.
        assert_eq!(run_tick(&f.ctx, &f.shutdown_rx).await, TickOutcome::ClusterMissing);
    }

    #[tokio::test]
    async fn unreachable_source_writes_nothing() {
        let f = fixture("http://127.0.0.1:1/metrics", "g1", policy(0), 1);

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::SourceUnreachable);
        assert!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().is_empty());
        assert!(f.orchestrator.scalings().is_empty());
    }

    #[tokio::test]
    async fn no_matching_samples_writes_nothing() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"other\",topic=\"t\"} 5000\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(0), 1);

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::NoSamples);
        assert!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn high_lag_records_and_scales() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 5200\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(0), 1);

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        // decide(5200) = 1 + floor((5200 - 100) / 1000) = 6.
        assert_eq!(outcome, TickOutcome::Scaled { lag: 5200.0, from: 1, to: 6 });
        assert_eq!(f.orchestrator.current(), 6);

        let lag_rows = f.store.list_lag_records(f.ctx.monitor.cluster_id, Some("g1")).unwrap();
        assert_eq!(lag_rows.len(), 1);
        assert_eq!(lag_rows[0].lag, 5200.0);

        let events = f.store.list_scaling_events(f.ctx.monitor.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].old_replicas, events[0].new_replicas), (1, 6));
    }

    #[tokio::test]
    async fn max_lag_wins_ties_first_seen() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 500\n\
             kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t2\"} 900\n\
             kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t3\"} 900\n"
                .to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(0), 1);

        run_tick(&f.ctx, &f.shutdown_rx).await;

        // One row per tick, holding the maximum; tie broken by first seen.
        let lag_rows = f.store.list_lag_records(f.ctx.monitor.cluster_id, Some("g1")).unwrap();
        assert_eq!(lag_rows.len(), 1);
        assert_eq!(lag_rows[0].topic, "t2");
        assert_eq!(lag_rows[0].lag, 900.0);
    }

    #[tokio::test]
    async fn matching_replica_count_records_without_event() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 50\n".to_string(),
        )
        .await;
        // Lag below threshold decides min_replicas = 1, which matches.
        let f = fixture(&url, "g1", policy(0), 1);

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::Observed { lag: 50.0, replicas: 1 });
        assert_eq!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().len(), 1);
        assert!(f.store.list_scaling_events(f.ctx.monitor.id).unwrap().is_empty());
        assert!(f.orchestrator.scalings().is_empty());
    }

    #[tokio::test]
    async fn cooldown_defers_scaling_but_still_records() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 5200\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(60_000), 1);
        // A just-written event opens the cooldown window.
        f.store
            .create_scaling_event(NewScalingEvent {
                monitor_id: f.ctx.monitor.id,
                group: "g1".to_string(),
                topic: "t1".to_string(),
                old_replicas: 1,
                new_replicas: 2,
                lag: 3000.0,
            })
            .unwrap();

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::CooldownHeld { lag: 5200.0 });
        assert_eq!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().len(), 1);
        assert_eq!(f.store.list_scaling_events(f.ctx.monitor.id).unwrap().len(), 1);
        assert!(f.orchestrator.scalings().is_empty());
    }

    #[tokio::test]
    async fn expired_cooldown_lets_scaling_proceed() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 5200\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(50), 1);
        f.store
            .create_scaling_event(NewScalingEvent {
                monitor_id: f.ctx.monitor.id,
                group: "g1".to_string(),
                topic: "t1".to_string(),
                old_replicas: 1,
                new_replicas: 2,
                lag: 3000.0,
            })
            .unwrap();

        // Let the 50ms window lapse, then the next tick scales normally.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::Scaled { lag: 5200.0, from: 1, to: 6 });
        assert_eq!(f.store.list_scaling_events(f.ctx.monitor.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn orchestrator_failure_keeps_lag_record() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 5200\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(0), 1);
        f.orchestrator.set_failing(true);

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        // Observability survives even when the control action fails.
        assert_eq!(outcome, TickOutcome::ScaleFailed { lag: 5200.0 });
        assert_eq!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().len(), 1);
        assert!(f.store.list_scaling_events(f.ctx.monitor.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn stopped_monitor_discards_tick_effects() {
        let url = spawn_metrics_stub(
            "kafka_consumergroup_lag_sum{consumergroup=\"g1\",topic=\"t1\"} 5200\n".to_string(),
        )
        .await;
        let f = fixture(&url, "g1", policy(0), 1);
        f.shutdown_tx.send(true).unwrap();

        let outcome = run_tick(&f.ctx, &f.shutdown_rx).await;

        assert_eq!(outcome, TickOutcome::Cancelled);
        assert!(f.store.list_lag_records(f.ctx.monitor.cluster_id, None).unwrap().is_empty());
        assert!(f.orchestrator.scalings().is_empty());
    }
}
