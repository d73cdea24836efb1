//! Named predicates over live cluster state.
//!
//! | name | holds when |
//! |---|---|
//! | `gpu_healthy` | every GPU in scope reports OK health |
//! | `no_xid_errors` | no GPU in scope carries an XID record |
//! | `nvlink_active` | every NVLink on GPUs in scope is Active |
//! | `ecc_cleared` | ECC counters are zero on GPUs in scope |
//! | `temperature_below` | GPUs in scope are below `threshold` °C (default 83) |
//! | `slurm_nodes_online` | nodes in scope are idle, allocated or mixed |
//! | `slurm_state` | nodes in scope are in the `expected` Slurm state |
//! | `node_powered_on` | nodes in scope have chassis power |
//!
//! Names are matched without case and with `-` read as `_`. An unknown name
//! or a scope naming missing hardware makes the rule fail.

use crate::rule::StateCheck;
use gpulab_cluster::ClusterStore;
use gpulab_types::{
    DgxNode, Gpu, GpuIndex, HealthStatus, NvLinkStatus, SlurmState, TEMPERATURE_WARNING_C,
};
use tracing::warn;

/// Outcome of a state check: pass/fail and a message for the learner.
pub type CheckOutcome = (bool, String);

/// Evaluate `check` against the store.
pub fn evaluate_state_check(check: &StateCheck, store: &ClusterStore) -> CheckOutcome {
    let name = check.check.to_ascii_lowercase().replace('-', "_");

    let nodes: Vec<&DgxNode> = match &check.node {
        Some(id) => match store.node(id) {
            Ok(node) => vec![node],
            Err(err) => {
                warn!(check = %check.check, %err, "State check scoped to missing node");
                return (false, format!("{}: {err}", check.check));
            }
        },
        None => store.cluster().nodes.iter().collect(),
    };

    let gpu_check = |label: &str, ok: &dyn Fn(&Gpu) -> bool| -> CheckOutcome {
        match scoped_gpus(&nodes, check.gpu) {
            Err(msg) => {
                warn!(check = %check.check, %msg, "State check scoped to missing GPU");
                (false, msg)
            }
            Ok(list) => match list.iter().find(|(_, g)| !ok(*g)) {
                None => (true, format!("{label}: {} GPU(s) OK", list.len())),
                Some((node, gpu)) => (
                    false,
                    format!("{label}: GPU {} on {} fails", gpu.index, node.id),
                ),
            },
        }
    };

    let node_check = |label: &str, ok: &dyn Fn(&DgxNode) -> bool| -> CheckOutcome {
        match nodes.iter().copied().find(|n| !ok(*n)) {
            None => (true, format!("{label}: {} node(s) OK", nodes.len())),
            Some(node) => (false, format!("{label}: {} fails", node.id)),
        }
    };

    match name.as_str() {
        "gpu_healthy" => gpu_check("GPU health", &|g| g.health == HealthStatus::Ok),
        "no_xid_errors" | "xid_cleared" => gpu_check("XID records", &|g| g.xid_errors.is_empty()),
        "nvlink_active" => gpu_check("NVLink", &|g| {
            g.nvlinks.iter().all(|l| l.status == NvLinkStatus::Active)
        }),
        "ecc_cleared" => gpu_check("ECC counters", &|g| g.ecc.is_clear()),
        "temperature_below" => {
            let limit = check.threshold.unwrap_or(TEMPERATURE_WARNING_C);
            gpu_check("Temperature", &|g| g.temperature_c < limit)
        }
        "slurm_nodes_online" => node_check("Slurm", &|n| n.slurm_state.is_online()),
        "slurm_state" => {
            let Some(raw) = check.expected.as_deref() else {
                warn!(check = %check.check, "slurm_state needs an expected state");
                return (false, "slurm_state: no expected state given".to_string());
            };
            match raw.parse::<SlurmState>() {
                Ok(want) => node_check("Slurm state", &|n| n.slurm_state == want),
                Err(err) => {
                    warn!(check = %check.check, %err, "Invalid expected Slurm state");
                    (false, format!("slurm_state: {err}"))
                }
            }
        }
        "node_powered_on" => node_check("Chassis power", &|n| n.bmc.chassis_power_on),
        _ => {
            warn!(check = %check.check, "Unknown state check");
            (false, format!("unknown state check '{}'", check.check))
        }
    }
}

/// GPUs selected by an optional index on each scoped node.
fn scoped_gpus<'s>(
    nodes: &[&'s DgxNode],
    gpu: Option<GpuIndex>,
) -> Result<Vec<(&'s DgxNode, &'s Gpu)>, String> {
    let mut out = Vec::new();
    for &node in nodes {
        match gpu {
            Some(index) => match node.gpu(index) {
                Some(g) => out.push((node, g)),
                None => return Err(format!("GPU {index} not found on {}", node.id)),
            },
            None => out.extend(node.gpus.iter().map(|g| (node, g))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_cluster::FaultSpec;
    use gpulab_test_helpers::{default_store, dgx, store_with_faults, xid_fault};
    use tracing_test::traced_test;

    #[test]
    fn test_healthy_cluster_passes_everything() {
        let store = default_store();
        for name in [
            "gpu_healthy",
            "no_xid_errors",
            "nvlink_active",
            "ecc_cleared",
            "temperature_below",
            "slurm_nodes_online",
            "node_powered_on",
        ] {
            let (passed, msg) = evaluate_state_check(&StateCheck::new(name), &store);
            assert!(passed, "{name}: {msg}");
        }
    }

    #[test]
    fn test_scoped_xid_check() {
        let store = store_with_faults(&[xid_fault(1, 3, 63)]);
        let whole = StateCheck::new("gpu-healthy");
        assert!(!evaluate_state_check(&whole, &store).0);

        let other_gpu = StateCheck::new("gpu_healthy").on_node(dgx(1)).on_gpu(GpuIndex(2));
        assert!(evaluate_state_check(&other_gpu, &store).0);

        let other_node = StateCheck::new("no_xid_errors").on_node(dgx(0));
        assert!(evaluate_state_check(&other_node, &store).0);
    }

    #[test]
    fn test_temperature_threshold() {
        let store = store_with_faults(&[FaultSpec::Thermal {
            node: dgx(0),
            gpu: GpuIndex(5),
            temperature_c: 86.0,
        }]);
        assert!(!evaluate_state_check(&StateCheck::new("temperature_below"), &store).0);
        let relaxed = StateCheck::new("temperature_below").with_threshold(90.0);
        assert!(evaluate_state_check(&relaxed, &store).0);
    }

    #[test]
    fn test_slurm_state_expected() {
        let store = store_with_faults(&[FaultSpec::NodeDrain {
            node: dgx(2),
            reason: "maintenance".to_string(),
        }]);
        let drained = StateCheck::new("slurm_state").on_node(dgx(2)).with_expected("drain");
        assert!(evaluate_state_check(&drained, &store).0);
        assert!(!evaluate_state_check(&StateCheck::new("slurm_nodes_online"), &store).0);
    }

    #[traced_test]
    #[test]
    fn test_invalid_checks_fail_closed() {
        let store = default_store();
        assert!(!evaluate_state_check(&StateCheck::new("gpu_happy"), &store).0);
        assert!(logs_contain("Unknown state check"));

        let missing = StateCheck::new("gpu_healthy").on_node(dgx(9));
        assert!(!evaluate_state_check(&missing, &store).0);

        let bad_gpu = StateCheck::new("gpu_healthy").on_gpu(GpuIndex(42));
        assert!(!evaluate_state_check(&bad_gpu, &store).0);

        let no_state = StateCheck::new("slurm_state");
        assert!(!evaluate_state_check(&no_state, &store).0);
    }
}
