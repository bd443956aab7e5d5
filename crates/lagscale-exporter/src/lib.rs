//! lagscale-exporter: lag acquisition from a metrics exposition endpoint.
//!
//! A Kafka exporter publishes per-(consumer group, topic) lag counters in
//! the Prometheus text exposition format. This crate fetches that text
//! over HTTP and extracts [`LagSample`]s from it.
//!
//! Parsing is deliberately forgiving: a line either matches the
//! `<metric>{<labels>} <value>` shape for the lag metric or it is dropped.
//! The parser never fails; only the network read can.

pub mod client;
pub mod error;
pub mod parse;

pub use client::ExporterClient;
pub use error::{ExporterError, ExporterResult};
pub use parse::{LagSample, discover_groups, parse_lag_samples};
