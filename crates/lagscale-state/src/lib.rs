//! lagscale-state: embedded state store for lagscale.
//!
//! Backed by [redb](https://docs.rs/redb), persists cluster configs,
//! monitor records, lag history, scaling events, and consumer-group
//! snapshots.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cluster_id}:{group}:{id}`, `{monitor_id}:{id}`)
//! enable prefix scans for child-row queries, so cascade deletes and
//! "latest event" lookups never need a secondary index. Row ids come from
//! a monotonic counter in a meta table, bumped inside the same write
//! transaction as the insert.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. Every multi-row mutation runs in
//! one write transaction; partial writes are never observable.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, now_ms};
pub use types::*;
