//! # Kubeforge Core
//!
//! Cluster lifecycle engine. A pool of dispatch workers claims cluster
//! documents through time-bounded leases, keeps each lease alive with a
//! heartbeat and drives the document toward its requested provisioning state.
//!
//! - [`backend`]: dispatcher, cluster managers and the worker runtime
//! - [`installer`]: resumable, phase-by-phase cluster installation
//! - [`graph`]: typed asset dependency graph with encrypted persistence
//! - [`classify`]: provider error predicates and the user-visible error pipeline
//! - [`operation`]: async operation finalization
//! - [`store`]: document, async operation and blob store ports with adapters
//!
//! The cloud boundary is a set of traits in [`cloud`]; [`cloud::DryRunCloud`]
//! provisions nothing and is useful for local runs.

pub mod backend;
pub mod classify;
pub mod cloud;
pub mod config;
pub mod error;
pub mod graph;
pub mod heartbeat;
pub mod installer;
pub mod operation;
pub mod store;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::BackendConfig;
pub use error::{ClusterError, Result};
