//! Core types for gpulab.
//!
//! This crate holds the hardware model shared by every other crate:
//!
//! - **Identifiers**: `NodeId`, `GpuIndex`, `LinkIndex`, `XidCode`
//! - **Hardware**: `Cluster` → `DgxNode` → `Gpu` (NVLinks, ECC, XID records)
//! - **XID catalog**: descriptions, severities, and the fatal set
//!
//! The types are plain data. Mutation rules (who may change what, and when a
//! reset is allowed) live in `gpulab-cluster`.

mod cluster;
mod gpu;
mod identifiers;
mod node;
mod xid;

pub use cluster::Cluster;
pub use gpu::{
    EccCounters, Gpu, HealthStatus, NvLink, NvLinkStatus, TEMPERATURE_CRITICAL_C,
    TEMPERATURE_WARNING_C,
};
pub use identifiers::{GpuIndex, LinkIndex, NodeId, XidCode};
pub use node::{BmcState, DgxNode, InvalidSlurmState, SelEntry, SlurmState};
pub use xid::{
    is_fatal_xid, xid_description, xid_severity, XidError, XidSeverity, FALLEN_OFF_BUS_MARKER,
    FATAL_XID_CODES, XID_FALLEN_OFF_BUS,
};
