//! Test fixtures for gpulab.
//!
//! Provides a default cluster store, fault shorthands, and [`TestShell`], which
//! runs one command line against a single simulator the way a session would.

use gpulab_cluster::{ClusterConfig, ClusterStore, FaultSpec};
use gpulab_core::{CommandResult, ExecutionContext, ShellEffect, Simulator};
use gpulab_parser::parse_with;
use gpulab_types::{GpuIndex, NodeId, XidCode};
use std::collections::BTreeMap;

/// Node id `dgx-NN` of the default cluster.
pub fn dgx(n: usize) -> NodeId {
    NodeId::indexed("dgx-", n)
}

/// Store holding the default 4-node, 8-GPU cluster.
pub fn default_store() -> ClusterStore {
    ClusterStore::new(ClusterConfig::default())
}

/// Store holding the default cluster with `faults` applied in order.
///
/// # Panics
///
/// Panics if a fault targets hardware that does not exist.
pub fn store_with_faults(faults: &[FaultSpec]) -> ClusterStore {
    let mut store = default_store();
    store
        .inject_all(faults)
        .expect("fixture faults must target existing hardware");
    store
}

/// XID fault on `dgx-NN` GPU `gpu`.
pub fn xid_fault(node: usize, gpu: u32, code: u32) -> FaultSpec {
    FaultSpec::Xid {
        node: dgx(node),
        gpu: GpuIndex(gpu),
        code: XidCode(code),
    }
}

/// Minimal shell around a store: current node plus environment.
pub struct TestShell {
    pub store: ClusterStore,
    pub node: NodeId,
    pub env: BTreeMap<String, String>,
}

impl TestShell {
    /// Shell on `dgx-00` of the given store.
    pub fn new(store: ClusterStore) -> Self {
        Self {
            store,
            node: dgx(0),
            env: BTreeMap::new(),
        }
    }

    /// Shell on `dgx-00` of the default cluster.
    pub fn healthy() -> Self {
        Self::new(default_store())
    }

    /// Run `line` through `sim`, applying any node switch it requests.
    pub fn run(&mut self, sim: &dyn Simulator, line: &str) -> CommandResult {
        let cmd = parse_with(line, &sim.flag_spec());
        let result = {
            let mut ctx = ExecutionContext::new(&mut self.store, &self.node, &self.env);
            sim.execute(&cmd, &mut ctx)
        };
        for effect in &result.effects {
            match effect {
                ShellEffect::SwitchNode(node) => self.node = node.clone(),
            }
        }
        result
    }
}
