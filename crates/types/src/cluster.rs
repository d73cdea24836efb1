//! The simulated cluster graph.

use crate::{DgxNode, Gpu, GpuIndex, HealthStatus, NodeId};
use serde::{Deserialize, Serialize};

/// An ordered set of DGX nodes.
///
/// Nodes are held in a persistent vector so a snapshot of the whole cluster is
/// an O(1) clone that shares structure with the live copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub nodes: im::Vector<DgxNode>,
}

impl Cluster {
    /// Create a cluster from a list of nodes.
    pub fn new(name: impl Into<String>, nodes: impl IntoIterator<Item = DgxNode>) -> Self {
        Self {
            name: name.into(),
            nodes: nodes.into_iter().collect(),
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&DgxNode> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Mutable node lookup.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut DgxNode> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    /// Look up a GPU on a node.
    pub fn gpu(&self, node: &NodeId, gpu: GpuIndex) -> Option<&Gpu> {
        self.node(node).and_then(|n| n.gpu(gpu))
    }

    /// Ids of every node, in cluster order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Iterate over every `(node, gpu)` pair.
    pub fn gpus(&self) -> impl Iterator<Item = (&DgxNode, &Gpu)> + '_ {
        self.nodes
            .iter()
            .flat_map(|n| n.gpus.iter().map(move |g| (n, g)))
    }

    /// Number of GPUs across all nodes.
    pub fn gpu_count(&self) -> usize {
        self.nodes.iter().map(|n| n.gpus.len()).sum()
    }

    /// Whether every GPU reports `HealthStatus::Ok`.
    pub fn all_healthy(&self) -> bool {
        self.gpus().all(|(_, g)| g.health == HealthStatus::Ok)
    }
}
