//! Session store, metrics derivation and configuration for Roundstat.
//!
//! This crate owns everything that runs on the producer side: the concurrent
//! per-participant [`SessionStore`], the pure metrics engine that turns
//! counters into a [`Snapshot`], and fact application at the ingest
//! boundary. Nothing here performs I/O or blocks on anything but an entity
//! lock.
//!
//! # Modules
//!
//! - [`clock`] -- Time source for capture timestamps.
//! - [`config`] -- Configuration loading from `roundstat-config.yaml` into
//!   strongly-typed structs.
//! - [`ingest`] -- Fact validation and application, round folding.
//! - [`metrics`] -- Derived metrics and snapshot construction.
//! - [`session`] -- The concurrent aggregate registry.
//!
//! [`SessionStore`]: session::SessionStore
//! [`Snapshot`]: roundstat_types::Snapshot

pub mod clock;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod session;
