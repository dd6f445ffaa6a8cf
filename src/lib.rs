//! KT Cloud operator - Cluster API infrastructure provider for KT Cloud
//!
//! The operator converges KT Cloud infrastructure toward the cluster and
//! machine declarations stored in Kubernetes. It creates virtual machines,
//! binds public addresses to control plane machines and keeps the ownership
//! links between Cluster API objects and their KT Cloud counterparts.
//!
//! # Architecture
//!
//! Reconcilers are level-triggered and idempotent:
//! - Relationships between objects are derived on every pass from owner
//!   references and naming conventions, never cached
//! - Each machine borrows the API token of the cluster it belongs to
//! - Anything not there yet is retried with a per-object backoff
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (KTCluster, KTMachine, etc.) and Cluster API views
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`graph`] - Ownership graph resolution between clusters, templates and machines
//! - [`credentials`] - Subject token lookup for machines
//! - [`cloud`] - KT Cloud API client and provisioning adapter
//! - [`store`] - Kubernetes reads and writes behind a mockable trait
//! - [`config`] - Command line and environment configuration
//! - [`retry`] - In-place retries and requeue backoff
//! - [`error`] - Error types for the operator

#![warn(missing_docs)]

pub mod cloud;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod graph;
pub mod retry;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
