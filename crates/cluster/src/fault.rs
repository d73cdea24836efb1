//! Fault injection.
//!
//! A `FaultSpec` is a scenario-level description of something going wrong.
//! Applying one goes through the store's mutation API, so injected faults obey
//! the same rules as everything else (health re-derivation, timestamps).

use crate::error::ClusterError;
use crate::store::{ClusterStore, GpuUpdate};
use gpulab_types::{
    Cluster, GpuIndex, LinkIndex, NodeId, NvLinkStatus, SlurmState, XidCode,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One injectable fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FaultSpec {
    /// Log an XID on a GPU, with the side effects the code implies
    /// (ECC counts for memory XIDs, a failed link for NVLink XIDs).
    Xid {
        node: NodeId,
        gpu: GpuIndex,
        code: XidCode,
    },

    /// Push a GPU to the given temperature.
    Thermal {
        node: NodeId,
        gpu: GpuIndex,
        temperature_c: f64,
    },

    /// Add ECC errors to a GPU.
    Ecc {
        node: NodeId,
        gpu: GpuIndex,
        #[serde(default)]
        single_bit: u64,
        #[serde(default)]
        double_bit: u64,
    },

    /// Change one NVLink's state.
    NvLink {
        node: NodeId,
        gpu: GpuIndex,
        link: LinkIndex,
        status: NvLinkStatus,
    },

    /// Drain a node in Slurm.
    NodeDrain { node: NodeId, reason: String },

    /// Mark a node down in Slurm.
    NodeDown { node: NodeId, reason: String },

    /// Lose chassis power on a node (also downs it in Slurm).
    PowerLoss { node: NodeId },
}

impl FaultSpec {
    /// Node the fault targets.
    pub fn node(&self) -> &NodeId {
        match self {
            FaultSpec::Xid { node, .. }
            | FaultSpec::Thermal { node, .. }
            | FaultSpec::Ecc { node, .. }
            | FaultSpec::NvLink { node, .. }
            | FaultSpec::NodeDrain { node, .. }
            | FaultSpec::NodeDown { node, .. }
            | FaultSpec::PowerLoss { node } => node,
        }
    }

    /// Short human-readable summary.
    pub fn describe(&self) -> String {
        match self {
            FaultSpec::Xid { node, gpu, code } => format!("XID {code} on {node} GPU {gpu}"),
            FaultSpec::Thermal {
                node,
                gpu,
                temperature_c,
            } => format!("{node} GPU {gpu} at {temperature_c:.0}C"),
            FaultSpec::Ecc {
                node,
                gpu,
                single_bit,
                double_bit,
            } => format!("ECC SBE={single_bit} DBE={double_bit} on {node} GPU {gpu}"),
            FaultSpec::NvLink {
                node,
                gpu,
                link,
                status,
            } => format!("NVLink {link} on {node} GPU {gpu} {status}"),
            FaultSpec::NodeDrain { node, reason } => format!("{node} drained: {reason}"),
            FaultSpec::NodeDown { node, reason } => format!("{node} down: {reason}"),
            FaultSpec::PowerLoss { node } => format!("{node} lost chassis power"),
        }
    }
}

impl ClusterStore {
    /// Apply a fault.
    pub fn inject(&mut self, fault: &FaultSpec) -> Result<(), ClusterError> {
        match fault {
            FaultSpec::Xid { node, gpu, code } => {
                self.append_xid(node, *gpu, *code)?;
                self.apply_xid_side_effects(node, *gpu, *code)?;
            }
            FaultSpec::Thermal {
                node,
                gpu,
                temperature_c,
            } => {
                self.update_gpu(node, *gpu, GpuUpdate::new().temperature(*temperature_c))?;
                if *temperature_c >= gpulab_types::TEMPERATURE_WARNING_C {
                    let sensor = format!("GPU{gpu} Temp");
                    self.add_sel_entry(node, &sensor, "Upper Critical going high", true)?;
                    // A hot GPU heats the chassis exhaust with it.
                    let bmc = &self.node(node)?.bmc;
                    let (inlet, exhaust) = (bmc.inlet_temp_c, bmc.exhaust_temp_c);
                    self.set_bmc_temperatures(node, inlet, exhaust.max(temperature_c - 35.0))?;
                }
            }
            FaultSpec::Ecc {
                node,
                gpu,
                single_bit,
                double_bit,
            } => {
                let ecc = self.gpu(node, *gpu)?.ecc;
                self.update_gpu(
                    node,
                    *gpu,
                    GpuUpdate::new().ecc(ecc.single_bit + single_bit, ecc.double_bit + double_bit),
                )?;
            }
            FaultSpec::NvLink {
                node,
                gpu,
                link,
                status,
            } => self.set_nvlink_status(node, *gpu, *link, *status)?,
            FaultSpec::NodeDrain { node, reason } => {
                self.set_slurm_state(node, SlurmState::Drain, Some(reason.clone()))?
            }
            FaultSpec::NodeDown { node, reason } => {
                self.set_slurm_state(node, SlurmState::Down, Some(reason.clone()))?
            }
            FaultSpec::PowerLoss { node } => {
                self.set_chassis_power(node, false)?;
                self.set_slurm_state(node, SlurmState::Down, Some("Not responding".to_string()))?;
            }
        }
        info!(fault = %fault.describe(), "Injected fault");
        Ok(())
    }

    /// Apply a list of faults in order, stopping at the first error.
    pub fn inject_all<'a>(
        &mut self,
        faults: impl IntoIterator<Item = &'a FaultSpec>,
    ) -> Result<(), ClusterError> {
        for fault in faults {
            self.inject(fault)?;
        }
        Ok(())
    }

    fn apply_xid_side_effects(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
        code: XidCode,
    ) -> Result<(), ClusterError> {
        match code.0 {
            // Uncorrectable memory errors.
            48 | 94 | 95 => self.with_gpu_mut(node, gpu, |g| g.ecc.double_bit += 1),
            // High single-bit error rate.
            92 => self.with_gpu_mut(node, gpu, |g| g.ecc.single_bit += 100),
            // Row remapping events carry a correctable error.
            63 | 64 => self.with_gpu_mut(node, gpu, |g| g.ecc.single_bit += 1),
            // NVLink failures take the first link down.
            72 | 74 | 76 | 77 => self.with_gpu_mut(node, gpu, |g| {
                if let Some(link) = g.nvlinks.first_mut() {
                    link.status = NvLinkStatus::Error;
                    link.error_count += 1;
                }
            }),
            // Off the bus: the driver no longer sees activity.
            79 => self.with_gpu_mut(node, gpu, |g| {
                g.utilization_pct = 0;
                g.power_draw_w = 0.0;
            }),
            _ => Ok(()),
        }
    }
}

/// XIDs drawn in practice mode.
const PRACTICE_XIDS: [u32; 11] = [13, 31, 43, 48, 63, 64, 74, 79, 92, 94, 95];

/// Seeded random fault generator for practice sessions.
pub struct FaultInjector {
    rng: ChaCha8Rng,
}

impl FaultInjector {
    /// Create an injector. Same seed, same sequence of faults.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw a random fault targeting the given cluster.
    ///
    /// Returns `None` for a cluster with no GPUs.
    pub fn random_fault(&mut self, cluster: &Cluster) -> Option<FaultSpec> {
        let candidates: Vec<_> = cluster.nodes.iter().filter(|n| !n.gpus.is_empty()).collect();
        if candidates.is_empty() {
            return None;
        }
        let node = candidates[self.rng.gen_range(0..candidates.len())];
        let gpu = node.gpus[self.rng.gen_range(0..node.gpus.len())].index;
        let node_id = node.id.clone();

        let fault = match self.rng.gen_range(0..10) {
            0..=4 => FaultSpec::Xid {
                node: node_id,
                gpu,
                code: XidCode(PRACTICE_XIDS[self.rng.gen_range(0..PRACTICE_XIDS.len())]),
            },
            5 | 6 => FaultSpec::Thermal {
                node: node_id,
                gpu,
                temperature_c: f64::from(self.rng.gen_range(84u32..96)),
            },
            7 => FaultSpec::Ecc {
                node: node_id,
                gpu,
                single_bit: self.rng.gen_range(1..50),
                double_bit: 0,
            },
            8 => FaultSpec::NvLink {
                node: node_id,
                gpu,
                link: LinkIndex(0),
                status: NvLinkStatus::Inactive,
            },
            _ => FaultSpec::NodeDrain {
                node: node_id,
                reason: "health check failed".to_string(),
            },
        };
        Some(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use gpulab_types::HealthStatus;
    use tracing_test::traced_test;

    fn dgx0() -> NodeId {
        NodeId::new("dgx-00")
    }

    #[traced_test]
    #[test]
    fn test_xid_48_counts_double_bit_error() {
        let mut store = ClusterStore::default();
        store
            .inject(&FaultSpec::Xid {
                node: dgx0(),
                gpu: GpuIndex(2),
                code: XidCode(48),
            })
            .unwrap();
        let gpu = store.gpu(&dgx0(), GpuIndex(2)).unwrap();
        assert_eq!(gpu.ecc.double_bit, 1);
        assert_eq!(gpu.health, HealthStatus::Critical);
    }

    #[traced_test]
    #[test]
    fn test_nvlink_xid_fails_link() {
        let mut store = ClusterStore::default();
        store
            .inject(&FaultSpec::Xid {
                node: dgx0(),
                gpu: GpuIndex(1),
                code: XidCode(74),
            })
            .unwrap();
        assert!(!store.gpu(&dgx0(), GpuIndex(1)).unwrap().all_links_active());
        // 74 is fatal, so an in-place reset is refused.
        assert!(store.reset_gpu(&dgx0(), GpuIndex(1)).is_err());
    }

    #[test]
    fn test_power_loss_downs_node() {
        let mut store = ClusterStore::default();
        store.inject(&FaultSpec::PowerLoss { node: dgx0() }).unwrap();
        let node = store.node(&dgx0()).unwrap();
        assert!(!node.bmc.chassis_power_on);
        assert_eq!(node.slurm_state, SlurmState::Down);
        assert_eq!(node.bmc.sel.len(), 1);
    }

    #[test]
    fn test_thermal_fault_logs_sel_and_heats_exhaust() {
        let mut store = ClusterStore::default();
        store
            .inject(&FaultSpec::Thermal {
                node: dgx0(),
                gpu: GpuIndex(3),
                temperature_c: 95.0,
            })
            .unwrap();
        let node = store.node(&dgx0()).unwrap();
        assert_eq!(node.gpu(GpuIndex(3)).unwrap().temperature_c, 95.0);
        assert_eq!(node.bmc.sel.len(), 1);
        assert_eq!(node.bmc.exhaust_temp_c, 60.0);
    }

    #[test]
    fn test_fault_specs_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Faults {
            faults: Vec<FaultSpec>,
        }
        let parsed: Faults = toml::from_str(
            r#"
            [[faults]]
            type = "xid"
            node = "dgx-00"
            gpu = 0
            code = 63

            [[faults]]
            type = "ecc"
            node = "dgx-01"
            gpu = 3
            single_bit = 12

            [[faults]]
            type = "nv_link"
            node = "dgx-02"
            gpu = 1
            link = 4
            status = "inactive"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.faults.len(), 3);
        assert_eq!(
            parsed.faults[0],
            FaultSpec::Xid {
                node: dgx0(),
                gpu: GpuIndex(0),
                code: XidCode(63)
            }
        );
        assert!(matches!(parsed.faults[1], FaultSpec::Ecc { double_bit: 0, single_bit: 12, .. }));
    }

    #[test]
    fn test_random_faults_are_deterministic_and_applicable() {
        let mut store = ClusterStore::new(ClusterConfig::default());
        let cluster = store.snapshot();
        let mut a = FaultInjector::new(5);
        let mut b = FaultInjector::new(5);
        for _ in 0..20 {
            let fa = a.random_fault(&cluster).unwrap();
            let fb = b.random_fault(&cluster).unwrap();
            assert_eq!(fa, fb);
            store.inject(&fa).unwrap();
        }
    }
}
