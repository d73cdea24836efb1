//! Cluster state store.
//!
//! The [`ClusterStore`] is the single mutable model of nodes, GPUs, links, and
//! errors. Everything else in gpulab reads it through borrowed views or
//! snapshots and changes it only through its mutation methods.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ClusterStore                         │
//! │                                                          │
//! │  ClusterConfig ──build_cluster()──▶ Cluster (im::Vector) │
//! │                                                          │
//! │  reads:     cluster() / snapshot() / node() / gpu()      │
//! │  mutations: update_gpu / append_xid / reset_gpu / ...    │
//! │  faults:    inject(FaultSpec)                            │
//! │  reset:     reset_cluster() / reset()                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # GPU reset policy
//!
//! A reset clears XID records only when none of them is in the fatal set
//! ([`gpulab_types::FATAL_XID_CODES`]). Otherwise the reset is refused with
//! [`ClusterError::ResetRefused`] and nothing changes.

mod builder;
mod config;
mod error;
mod fault;
mod store;

pub use builder::build_cluster;
pub use config::ClusterConfig;
pub use error::ClusterError;
pub use fault::{FaultInjector, FaultSpec};
pub use store::{ClusterStore, GpuResetReport, GpuUpdate};
