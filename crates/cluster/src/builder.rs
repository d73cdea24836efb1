//! Construction of the healthy baseline cluster.

use crate::config::ClusterConfig;
use gpulab_types::{
    BmcState, Cluster, DgxNode, EccCounters, Gpu, GpuIndex, HealthStatus, LinkIndex, NodeId,
    NvLink, NvLinkStatus, SlurmState,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// PCI bus numbers of the eight SXM slots on a DGX A100 baseboard.
const DGX_PCI_BUSES: [u8; 8] = [0x07, 0x0F, 0x47, 0x4E, 0x87, 0x90, 0xB7, 0xBD];

/// Idle temperature band for a healthy GPU, °C.
const IDLE_TEMP_RANGE: (f64, f64) = (31.0, 39.0);

/// Idle power band for a healthy GPU, W.
const IDLE_POWER_RANGE: (f64, f64) = (55.0, 72.0);

/// Per-link NVLink bandwidth, GB/s.
const NVLINK_SPEED_GBPS: f64 = 25.0;

/// Build the all-healthy cluster described by `config`.
///
/// Deterministic: the same configuration always yields the same cluster.
pub fn build_cluster(config: &ClusterConfig) -> Cluster {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let nodes = (0..config.num_nodes).map(|n| build_node(config, n, &mut rng));
    Cluster::new(config.name.clone(), nodes)
}

fn build_node(config: &ClusterConfig, index: usize, rng: &mut ChaCha8Rng) -> DgxNode {
    let gpus = (0..config.gpus_per_node)
        .map(|g| build_gpu(config, index, g, rng))
        .collect();

    DgxNode {
        id: NodeId::indexed(&config.node_prefix, index),
        model: "DGX A100".to_string(),
        slurm_state: SlurmState::Idle,
        slurm_reason: None,
        partition: config.partition.clone(),
        cpus: 256,
        memory_mb: 1_048_576,
        gpus,
        bmc: BmcState {
            chassis_power_on: true,
            inlet_temp_c: round1(rng.gen_range(21.0..24.0)),
            exhaust_temp_c: round1(rng.gen_range(33.0..38.0)),
            fan_rpm: (0..6).map(|_| rng.gen_range(8_800..9_400)).collect(),
            psu_ok: vec![true; 6],
            sel: Vec::new(),
        },
    }
}

fn build_gpu(config: &ClusterConfig, node: usize, index: u32, rng: &mut ChaCha8Rng) -> Gpu {
    let bus = DGX_PCI_BUSES[index as usize % DGX_PCI_BUSES.len()];
    let uuid_hi: u32 = rng.gen();
    let uuid_lo: u64 = rng.gen();

    let nvlinks = (0..config.nvlinks_per_gpu)
        .map(|l| NvLink {
            link: LinkIndex(l),
            remote_gpu: remote_for_link(index, l, config.gpus_per_node),
            status: NvLinkStatus::Active,
            speed_gbps: NVLINK_SPEED_GBPS,
            error_count: 0,
        })
        .collect();

    Gpu {
        index: GpuIndex(index),
        name: config.gpu_model.clone(),
        uuid: format!(
            "GPU-{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            uuid_hi,
            (uuid_lo >> 48) & 0xffff,
            (uuid_lo >> 32) & 0xffff,
            (uuid_lo >> 16) & 0xffff,
            uuid_lo & 0xffff_ffff_ffff
        ),
        pci_bus_id: format!("00000000:{bus:02X}:00.0"),
        serial: format!("{}", 1_652_020_000_000u64 + (node as u64) * 100 + index as u64),
        health: HealthStatus::Ok,
        temperature_c: round1(rng.gen_range(IDLE_TEMP_RANGE.0..IDLE_TEMP_RANGE.1)),
        power_draw_w: round1(rng.gen_range(IDLE_POWER_RANGE.0..IDLE_POWER_RANGE.1)),
        power_limit_w: 400.0,
        max_power_limit_w: 400.0,
        memory_used_mb: 0,
        memory_total_mb: 81_920,
        utilization_pct: 0,
        persistence_mode: true,
        nvlinks,
        ecc: EccCounters::default(),
        xid_errors: Vec::new(),
    }
}

/// GPU at the far end of link `link` of GPU `index`, spreading links evenly
/// over the other GPUs in the node.
fn remote_for_link(index: u32, link: u8, gpus_per_node: u32) -> GpuIndex {
    if gpus_per_node <= 1 {
        return GpuIndex(index);
    }
    let peers = gpus_per_node - 1;
    GpuIndex((index + 1 + u32::from(link) % peers) % gpus_per_node)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cluster_shape() {
        let cluster = build_cluster(&ClusterConfig::default());
        assert_eq!(cluster.nodes.len(), 4);
        assert_eq!(cluster.gpu_count(), 32);
        assert!(cluster.node(&NodeId::new("dgx-00")).is_some());
        assert!(cluster.node(&NodeId::new("dgx-03")).is_some());
        assert!(cluster.all_healthy());
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = ClusterConfig::default();
        assert_eq!(build_cluster(&config), build_cluster(&config));
        let other = build_cluster(&config.clone().with_seed(99));
        assert_ne!(build_cluster(&config), other);
    }

    #[test]
    fn test_links_never_point_at_self() {
        let cluster = build_cluster(&ClusterConfig::default());
        for (_, gpu) in cluster.gpus() {
            assert_eq!(gpu.nvlinks.len(), 12);
            assert!(gpu.nvlinks.iter().all(|l| l.remote_gpu != gpu.index));
        }
    }
}
