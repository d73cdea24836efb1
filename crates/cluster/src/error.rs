//! Error types for cluster state operations.

use gpulab_types::{GpuIndex, LinkIndex, NodeId, XidCode};
use thiserror::Error;

/// Errors from cluster state reads and mutations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterError {
    /// No node with this id.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// No GPU with this index on the node.
    #[error("GPU {gpu} not found on {node}")]
    GpuNotFound { node: NodeId, gpu: GpuIndex },

    /// No NVLink with this index on the GPU.
    #[error("NVLink {link} not found on GPU {gpu} of {node}")]
    LinkNotFound {
        node: NodeId,
        gpu: GpuIndex,
        link: LinkIndex,
    },

    /// The GPU carries a fatal XID and cannot be reset in place.
    /// State is left unchanged.
    #[error("GPU {gpu} on {node} cannot be reset: XID {code} ({description}) requires a node-level recovery")]
    ResetRefused {
        node: NodeId,
        gpu: GpuIndex,
        code: XidCode,
        description: String,
    },

    /// A field update was out of range.
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
