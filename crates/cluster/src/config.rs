//! Configuration for the default cluster.

use serde::{Deserialize, Serialize};

/// Shape of the cluster built at session start and on reset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name shown by Slurm tools.
    pub name: String,

    /// Number of DGX nodes.
    pub num_nodes: usize,

    /// GPUs per node.
    pub gpus_per_node: u32,

    /// NVLinks per GPU.
    pub nvlinks_per_gpu: u8,

    /// GPU product name.
    pub gpu_model: String,

    /// Node name prefix; nodes are `<prefix>00`, `<prefix>01`, ...
    pub node_prefix: String,

    /// Slurm partition holding every node.
    pub partition: String,

    /// Seed for baseline sensor jitter. Same seed, same cluster.
    pub seed: u64,
}

impl ClusterConfig {
    /// Create a configuration with the given node and GPU counts.
    pub fn new(num_nodes: usize, gpus_per_node: u32) -> Self {
        Self {
            name: "dgx-cluster".to_string(),
            num_nodes,
            gpus_per_node,
            nvlinks_per_gpu: 12,
            gpu_model: "NVIDIA A100-SXM4-80GB".to_string(),
            node_prefix: "dgx-".to_string(),
            partition: "batch".to_string(),
            seed: 12345,
        }
    }

    /// Set the cluster name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the number of NVLinks per GPU.
    pub fn with_nvlinks_per_gpu(mut self, links: u8) -> Self {
        self.nvlinks_per_gpu = links;
        self
    }

    /// Set the GPU product name.
    pub fn with_gpu_model(mut self, model: impl Into<String>) -> Self {
        self.gpu_model = model.into();
        self
    }

    /// Set the node name prefix.
    pub fn with_node_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node_prefix = prefix.into();
        self
    }

    /// Set the Slurm partition name.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Set the jitter seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Total GPUs across all nodes.
    pub fn total_gpus(&self) -> usize {
        self.num_nodes * self.gpus_per_node as usize
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new(4, 8)
    }
}
