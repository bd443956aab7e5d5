//! lagscale-policy: the scaling decision function.
//!
//! Maps an observed consumer-group lag to a target replica count according
//! to a [`ScalingPolicyConfig`]. The decision is a pure function: no I/O,
//! no clocks, deterministic for a given `(lag, config)` pair. Cooldown
//! enforcement is a separate predicate over scaling-event timestamps so the
//! caller decides where "now" comes from.

pub mod config;
pub mod evaluate;

pub use config::{PolicyError, ScalingPolicyConfig};
pub use evaluate::{cooldown_active, decide};
