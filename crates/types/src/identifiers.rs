//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// DGX node identifier (e.g. `dgx-00`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a node id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Node id for the `index`-th node using the given name prefix.
    ///
    /// Indices are zero-padded to two digits: `dgx-00`, `dgx-01`, ...
    pub fn indexed(prefix: &str, index: usize) -> Self {
        NodeId(format!("{prefix}{index:02}"))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// GPU index within a node (the `-i` argument of `nvidia-smi`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GpuIndex(pub u32);

impl fmt::Display for GpuIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// NVLink index on a GPU.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LinkIndex(pub u8);

impl fmt::Display for LinkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor XID error code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct XidCode(pub u32);

impl fmt::Display for XidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_node_ids_are_zero_padded() {
        assert_eq!(NodeId::indexed("dgx-", 0).as_str(), "dgx-00");
        assert_eq!(NodeId::indexed("dgx-", 7).as_str(), "dgx-07");
        assert_eq!(NodeId::indexed("node", 12).as_str(), "node12");
    }

    #[test]
    fn test_identifiers_serialize_transparently() {
        let json = serde_json::to_string(&NodeId::new("dgx-01")).unwrap();
        assert_eq!(json, "\"dgx-01\"");
        let code: XidCode = serde_json::from_str("79").unwrap();
        assert_eq!(code, XidCode(79));
    }
}
