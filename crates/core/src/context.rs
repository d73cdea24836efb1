//! Per-command execution context.

use gpulab_cluster::{ClusterError, ClusterStore};
use gpulab_types::{DgxNode, NodeId};
use std::collections::BTreeMap;

/// Everything a simulator may see or touch while running one command.
pub struct ExecutionContext<'a> {
    /// The cluster store. Simulators mutate hardware only through this.
    pub store: &'a mut ClusterStore,

    /// Node the learner is "logged into".
    pub current_node: &'a NodeId,

    /// Shell environment variables.
    pub env: &'a BTreeMap<String, String>,
}

impl<'a> ExecutionContext<'a> {
    /// Create a context.
    pub fn new(
        store: &'a mut ClusterStore,
        current_node: &'a NodeId,
        env: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            store,
            current_node,
            env,
        }
    }

    /// The current node.
    pub fn node(&self) -> Result<&DgxNode, ClusterError> {
        self.store.node(self.current_node)
    }

    /// Look up an environment variable.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }
}
