//! Scaling policy configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by policy-config validation.
///
/// These are structural configuration errors, rejected when a monitor is
/// started, never during evaluation.
#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("scale_up_factor must be positive, got {0}")]
    NonPositiveFactor(f64),

    #[error("min_replicas ({min}) exceeds max_replicas ({max})")]
    InvertedBounds { min: u32, max: u32 },

    #[error("lag_threshold must be non-negative, got {0}")]
    NegativeThreshold(f64),
}

/// Scaling parameters for one monitored consumer group.
///
/// A monitor snapshots this config when it starts, so later changes to a
/// shared default never retroactively alter a running monitor's behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingPolicyConfig {
    /// Floor for every scaling decision.
    pub min_replicas: u32,
    /// Ceiling for every scaling decision.
    pub max_replicas: u32,
    /// Lag at or below this value keeps the workload at `min_replicas`.
    pub lag_threshold: f64,
    /// One extra replica per this many lagged messages above the threshold.
    pub scale_up_factor: f64,
    /// Minimum milliseconds between two scaling actions for the same monitor.
    pub cooldown_ms: u64,
}

impl ScalingPolicyConfig {
    /// Validate the config for use by a monitor.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.scale_up_factor <= 0.0 || !self.scale_up_factor.is_finite() {
            return Err(PolicyError::NonPositiveFactor(self.scale_up_factor));
        }
        if self.min_replicas > self.max_replicas {
            return Err(PolicyError::InvertedBounds {
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }
        if self.lag_threshold < 0.0 || !self.lag_threshold.is_finite() {
            return Err(PolicyError::NegativeThreshold(self.lag_threshold));
        }
        Ok(())
    }
}

impl Default for ScalingPolicyConfig {
    /// One replica per 1000 lagged messages over a 100-message threshold,
    /// bounded to [1, 10], with a 30s cooldown.
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            lag_threshold: 100.0,
            scale_up_factor: 1000.0,
            cooldown_ms: 30_000,
        }
    }
}
