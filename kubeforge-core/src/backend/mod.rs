//! Lease-driven processing of cluster documents.
//!
//! Workers dequeue a document, hold its lease through a [`Heartbeat`](crate::heartbeat::Heartbeat)
//! and hand it to a [`ClusterManager`] chosen by provisioning state. The
//! [`Dispatcher`] records the outcome on the document and its async operation.

pub mod dispatcher;
pub mod manager;
pub mod runtime;

pub use dispatcher::{Dispatcher, ResultType};
pub use manager::{ClusterManager, DefaultManager, DefaultManagerFactory, ManagerFactory};
pub use runtime::BackendRuntime;
