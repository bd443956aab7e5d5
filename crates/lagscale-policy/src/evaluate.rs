//! The lag-to-replicas decision function and the cooldown predicate.

use crate::config::ScalingPolicyConfig;

/// Decide the target replica count for an observed lag.
///
/// Lag at or below the threshold settles at `min_replicas`; above it, one
/// replica is added per `scale_up_factor` lagged messages, capped at
/// `max_replicas`. Total over `lag >= 0` and any validated config; the
/// result is always within `[min_replicas, max_replicas]`.
pub fn decide(lag: f64, cfg: &ScalingPolicyConfig) -> u32 {
    if lag <= cfg.lag_threshold {
        return cfg.min_replicas;
    }
    // f64-to-u32 casts saturate, so absurd lag values cap at max_replicas.
    let extra = ((lag - cfg.lag_threshold) / cfg.scale_up_factor).floor() as u32;
    cfg.min_replicas
        .saturating_add(extra)
        .min(cfg.max_replicas)
}

/// Whether the cooldown window since the last scaling action is still open.
///
/// Timestamps are unix epoch milliseconds; the caller supplies `now` (the
/// supervisor reads `last_action_at` off the latest persisted scaling event).
pub fn cooldown_active(last_action_at: u64, now: u64, cfg: &ScalingPolicyConfig) -> bool {
    now.saturating_sub(last_action_at) < cfg.cooldown_ms
}
