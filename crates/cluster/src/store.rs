//! The cluster state store.
//!
//! `ClusterStore` is the only owner of mutable hardware state. Readers get
//! borrowed views or owned snapshots; writers go through the mutation methods
//! below, each of which applies fully (including health re-derivation) before
//! returning.

use crate::builder::build_cluster;
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use gpulab_types::{
    Cluster, DgxNode, Gpu, GpuIndex, HealthStatus, LinkIndex, NodeId, NvLinkStatus, SelEntry,
    SlurmState, XidCode, XidError,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Targeted update of one GPU's fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GpuUpdate {
    pub temperature_c: Option<f64>,
    pub power_draw_w: Option<f64>,
    pub power_limit_w: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub utilization_pct: Option<u32>,
    pub persistence_mode: Option<bool>,
    pub ecc_single_bit: Option<u64>,
    pub ecc_double_bit: Option<u64>,

    /// Applied after health is re-derived from the other fields.
    pub health: Option<HealthStatus>,
}

impl GpuUpdate {
    /// Empty update.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        self.temperature_c = Some(celsius);
        self
    }

    pub fn power_draw(mut self, watts: f64) -> Self {
        self.power_draw_w = Some(watts);
        self
    }

    pub fn power_limit(mut self, watts: f64) -> Self {
        self.power_limit_w = Some(watts);
        self
    }

    pub fn memory_used(mut self, mb: u64) -> Self {
        self.memory_used_mb = Some(mb);
        self
    }

    pub fn utilization(mut self, pct: u32) -> Self {
        self.utilization_pct = Some(pct);
        self
    }

    pub fn persistence_mode(mut self, enabled: bool) -> Self {
        self.persistence_mode = Some(enabled);
        self
    }

    pub fn ecc(mut self, single_bit: u64, double_bit: u64) -> Self {
        self.ecc_single_bit = Some(single_bit);
        self.ecc_double_bit = Some(double_bit);
        self
    }

    pub fn health(mut self, health: HealthStatus) -> Self {
        self.health = Some(health);
        self
    }

    /// Check every set field against the GPU's limits.
    fn validate(&self, gpu: &Gpu) -> Result<(), ClusterError> {
        if let Some(t) = self.temperature_c {
            if !t.is_finite() || !(-40.0..=150.0).contains(&t) {
                return Err(invalid("temperature_c", t));
            }
        }
        if let Some(p) = self.power_draw_w {
            if !p.is_finite() || p < 0.0 {
                return Err(invalid("power_draw_w", p));
            }
        }
        if let Some(p) = self.power_limit_w {
            if !p.is_finite() || p < 100.0 || p > gpu.max_power_limit_w {
                return Err(invalid("power_limit_w", p));
            }
        }
        if let Some(m) = self.memory_used_mb {
            if m > gpu.memory_total_mb {
                return Err(invalid("memory_used_mb", m));
            }
        }
        if let Some(u) = self.utilization_pct {
            if u > 100 {
                return Err(invalid("utilization_pct", u));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl ToString) -> ClusterError {
    ClusterError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

/// Outcome of a successful GPU reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuResetReport {
    pub node: NodeId,
    pub gpu: GpuIndex,

    /// XID records removed by the reset.
    pub cleared_xids: usize,

    /// NVLinks brought back from `Error` to `Active`.
    pub retrained_links: usize,
}

/// Sole owner of the simulated cluster.
pub struct ClusterStore {
    config: ClusterConfig,
    cluster: Cluster,

    /// Simulation clock; XID and SEL timestamps come from here.
    now: Duration,

    next_sel_id: u32,
}

impl ClusterStore {
    /// Create a store holding the healthy baseline for `config`.
    pub fn new(config: ClusterConfig) -> Self {
        let cluster = build_cluster(&config);
        info!(
            nodes = cluster.nodes.len(),
            gpus = cluster.gpu_count(),
            "Built cluster"
        );
        Self {
            config,
            cluster,
            now: Duration::ZERO,
            next_sel_id: 1,
        }
    }

    /// The configuration the baseline is built from.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Clock
    // ═══════════════════════════════════════════════════════════════════════

    /// Set the simulation clock.
    pub fn set_time(&mut self, now: Duration) {
        self.now = now;
    }

    /// Advance the simulation clock.
    pub fn advance_time(&mut self, by: Duration) {
        self.now += by;
    }

    /// Current simulation time.
    pub fn now(&self) -> Duration {
        self.now
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════

    /// Borrowed view of the whole cluster.
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Owned snapshot of the whole cluster. Changes to the snapshot are not
    /// reflected back into the store.
    pub fn snapshot(&self) -> Cluster {
        self.cluster.clone()
    }

    /// Look up a node.
    pub fn node(&self, id: &NodeId) -> Result<&DgxNode, ClusterError> {
        self.cluster
            .node(id)
            .ok_or_else(|| ClusterError::NodeNotFound(id.clone()))
    }

    /// Look up a GPU.
    pub fn gpu(&self, node: &NodeId, gpu: GpuIndex) -> Result<&Gpu, ClusterError> {
        self.node(node)?
            .gpu(gpu)
            .ok_or_else(|| ClusterError::GpuNotFound {
                node: node.clone(),
                gpu,
            })
    }

    /// Whether a node with this id exists.
    pub fn has_node(&self, id: &NodeId) -> bool {
        self.cluster.node(id).is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // GPU mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Update one GPU's named fields.
    ///
    /// All fields are validated before any is written, so a rejected update
    /// leaves the GPU untouched.
    pub fn update_gpu(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
        update: GpuUpdate,
    ) -> Result<(), ClusterError> {
        update.validate(self.gpu(node, gpu)?)?;

        self.with_gpu_mut(node, gpu, |g| {
            if let Some(t) = update.temperature_c {
                g.temperature_c = t;
            }
            if let Some(p) = update.power_draw_w {
                g.power_draw_w = p;
            }
            if let Some(p) = update.power_limit_w {
                g.power_limit_w = p;
            }
            if let Some(m) = update.memory_used_mb {
                g.memory_used_mb = m;
            }
            if let Some(u) = update.utilization_pct {
                g.utilization_pct = u;
            }
            if let Some(pm) = update.persistence_mode {
                g.persistence_mode = pm;
            }
            if let Some(s) = update.ecc_single_bit {
                g.ecc.single_bit = s;
            }
            if let Some(d) = update.ecc_double_bit {
                g.ecc.double_bit = d;
            }
        })?;

        if let Some(health) = update.health {
            // Explicit override wins over the derived value.
            if let Some(g) = self.gpu_entry(node, gpu) {
                g.health = health;
            }
        }

        debug!(%node, %gpu, ?update, "Updated GPU");
        Ok(())
    }

    /// Append an XID record stamped with the current clock.
    pub fn append_xid(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
        code: XidCode,
    ) -> Result<(), ClusterError> {
        let record = XidError::from_catalog(code, self.now.as_secs_f64());
        self.with_gpu_mut(node, gpu, |g| g.xid_errors.push(record))?;
        info!(%node, %gpu, %code, "Appended XID error");
        Ok(())
    }

    /// Reset a GPU's transient error state.
    ///
    /// Refused, with state unchanged, when any current XID is in the fatal
    /// set. Otherwise clears XID records and volatile single-bit ECC counts,
    /// retrains links in `Error`, and drops utilization and memory use to zero.
    pub fn reset_gpu(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
    ) -> Result<GpuResetReport, ClusterError> {
        if let Some(fatal) = self.gpu(node, gpu)?.first_fatal_xid() {
            warn!(
                %node,
                %gpu,
                code = %fatal.code,
                "GPU reset refused: fatal XID present"
            );
            return Err(ClusterError::ResetRefused {
                node: node.clone(),
                gpu,
                code: fatal.code,
                description: fatal.description.clone(),
            });
        }

        let (cleared_xids, retrained_links) = self.with_gpu_mut(node, gpu, |g| {
            let cleared = g.xid_errors.len();
            g.xid_errors.clear();
            g.ecc.single_bit = 0;
            g.utilization_pct = 0;
            g.memory_used_mb = 0;

            let mut retrained = 0;
            for link in g.nvlinks.iter_mut().filter(|l| l.status == NvLinkStatus::Error) {
                link.status = NvLinkStatus::Active;
                link.error_count = 0;
                retrained += 1;
            }
            (cleared, retrained)
        })?;

        info!(%node, %gpu, cleared_xids, retrained_links, "Reset GPU");
        Ok(GpuResetReport {
            node: node.clone(),
            gpu,
            cleared_xids,
            retrained_links,
        })
    }

    /// Zero both ECC counters on a GPU.
    pub fn clear_ecc(&mut self, node: &NodeId, gpu: GpuIndex) -> Result<(), ClusterError> {
        self.with_gpu_mut(node, gpu, |g| {
            g.ecc.single_bit = 0;
            g.ecc.double_bit = 0;
        })?;
        info!(%node, %gpu, "Cleared ECC counters");
        Ok(())
    }

    /// Set one NVLink's status.
    pub fn set_nvlink_status(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
        link: LinkIndex,
        status: NvLinkStatus,
    ) -> Result<(), ClusterError> {
        if self.gpu(node, gpu)?.link(link).is_none() {
            return Err(ClusterError::LinkNotFound {
                node: node.clone(),
                gpu,
                link,
            });
        }
        self.with_gpu_mut(node, gpu, |g| {
            if let Some(l) = g.nvlinks.iter_mut().find(|l| l.link == link) {
                l.status = status;
                if status == NvLinkStatus::Error {
                    l.error_count += 1;
                }
            }
        })?;
        info!(%node, %gpu, %link, %status, "Set NVLink status");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Node mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Set a node's Slurm state. The reason is kept only for drain/down.
    pub fn set_slurm_state(
        &mut self,
        node: &NodeId,
        state: SlurmState,
        reason: Option<String>,
    ) -> Result<(), ClusterError> {
        let n = self.node_entry(node)?;
        n.slurm_state = state;
        n.slurm_reason = match state {
            SlurmState::Drain | SlurmState::Down => reason,
            _ => None,
        };
        info!(%node, %state, "Set Slurm state");
        Ok(())
    }

    /// Power the chassis on or off.
    pub fn set_chassis_power(&mut self, node: &NodeId, on: bool) -> Result<(), ClusterError> {
        self.node_entry(node)?.bmc.chassis_power_on = on;
        let event = if on { "Power on" } else { "Power off/down" };
        self.add_sel_entry(node, "Power Unit", event, true)?;
        info!(%node, on, "Set chassis power");
        Ok(())
    }

    /// Power-cycle a node.
    ///
    /// This is the node-level recovery that a refused GPU reset calls for:
    /// every GPU loses its XID records (fatal ones included) and volatile ECC
    /// counts, all links retrain, and the driver comes back idle. Slurm state
    /// is left alone; a downed node still has to be resumed by an operator.
    pub fn power_cycle_node(&mut self, node: &NodeId) -> Result<usize, ClusterError> {
        let n = self.node_entry(node)?;
        n.bmc.chassis_power_on = true;
        let mut cleared = 0;
        for g in n.gpus.iter_mut() {
            cleared += g.xid_errors.len();
            g.xid_errors.clear();
            g.ecc = Default::default();
            g.utilization_pct = 0;
            g.memory_used_mb = 0;
            for link in g.nvlinks.iter_mut() {
                link.status = NvLinkStatus::Active;
                link.error_count = 0;
            }
            g.refresh_health();
        }
        self.add_sel_entry(node, "Power Unit", "Power cycle", true)?;
        info!(%node, cleared_xids = cleared, "Power-cycled node");
        Ok(cleared)
    }

    /// Append a System Event Log record.
    pub fn add_sel_entry(
        &mut self,
        node: &NodeId,
        sensor: &str,
        event: &str,
        asserted: bool,
    ) -> Result<(), ClusterError> {
        let id = self.next_sel_id;
        let timestamp_secs = self.now.as_secs_f64();
        self.node_entry(node)?.bmc.sel.push(SelEntry {
            id,
            timestamp_secs,
            sensor: sensor.to_string(),
            event: event.to_string(),
            asserted,
        });
        self.next_sel_id += 1;
        Ok(())
    }

    /// Clear a node's System Event Log.
    pub fn clear_sel(&mut self, node: &NodeId) -> Result<usize, ClusterError> {
        let sel = &mut self.node_entry(node)?.bmc.sel;
        let cleared = sel.len();
        sel.clear();
        info!(%node, cleared, "Cleared SEL");
        Ok(cleared)
    }

    /// Set a node's inlet and exhaust temperatures.
    pub fn set_bmc_temperatures(
        &mut self,
        node: &NodeId,
        inlet_c: f64,
        exhaust_c: f64,
    ) -> Result<(), ClusterError> {
        let bmc = &mut self.node_entry(node)?.bmc;
        bmc.inlet_temp_c = inlet_c;
        bmc.exhaust_temp_c = exhaust_c;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bulk reset
    // ═══════════════════════════════════════════════════════════════════════

    /// Restore the healthy baseline hardware. The clock keeps running.
    pub fn reset_cluster(&mut self) {
        self.cluster = build_cluster(&self.config);
        self.next_sel_id = 1;
        info!("Reset cluster to baseline");
    }

    /// Full reset between runs: baseline hardware and clock at zero.
    pub fn reset(&mut self) {
        self.reset_cluster();
        self.now = Duration::ZERO;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Internal helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn node_entry(&mut self, node: &NodeId) -> Result<&mut DgxNode, ClusterError> {
        self.cluster
            .node_mut(node)
            .ok_or_else(|| ClusterError::NodeNotFound(node.clone()))
    }

    fn gpu_entry(&mut self, node: &NodeId, gpu: GpuIndex) -> Option<&mut Gpu> {
        self.cluster.node_mut(node).and_then(|n| n.gpu_mut(gpu))
    }

    /// Apply `f` to a GPU, then re-derive its health.
    pub(crate) fn with_gpu_mut<T>(
        &mut self,
        node: &NodeId,
        gpu: GpuIndex,
        f: impl FnOnce(&mut Gpu) -> T,
    ) -> Result<T, ClusterError> {
        let entry = self
            .node_entry(node)?
            .gpu_mut(gpu)
            .ok_or_else(|| ClusterError::GpuNotFound {
                node: node.clone(),
                gpu,
            })?;
        let out = f(entry);
        entry.refresh_health();
        Ok(out)
    }
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new(ClusterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn dgx(n: usize) -> NodeId {
        NodeId::indexed("dgx-", n)
    }

    #[traced_test]
    #[test]
    fn test_power_cycle_clears_fatal_xid() {
        let mut store = ClusterStore::default();
        store.append_xid(&dgx(1), GpuIndex(2), XidCode(79)).unwrap();
        assert!(store.reset_gpu(&dgx(1), GpuIndex(2)).is_err());

        let cleared = store.power_cycle_node(&dgx(1)).unwrap();
        assert_eq!(cleared, 1);
        let gpu = store.gpu(&dgx(1), GpuIndex(2)).unwrap();
        assert!(gpu.xid_errors.is_empty());
        assert_eq!(gpu.health, HealthStatus::Ok);
        assert_eq!(store.node(&dgx(1)).unwrap().bmc.sel.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_reset_clears_non_fatal_xid() {
        let mut store = ClusterStore::default();
        store.append_xid(&dgx(0), GpuIndex(0), XidCode(63)).unwrap();
        assert_eq!(
            store.gpu(&dgx(0), GpuIndex(0)).unwrap().health,
            HealthStatus::Warning
        );

        let report = store.reset_gpu(&dgx(0), GpuIndex(0)).unwrap();
        assert_eq!(report.cleared_xids, 1);

        let gpu = store.gpu(&dgx(0), GpuIndex(0)).unwrap();
        assert!(gpu.xid_errors.is_empty());
        assert_eq!(gpu.health, HealthStatus::Ok);
    }

    #[traced_test]
    #[test]
    fn test_reset_refused_on_fatal_xid() {
        let mut store = ClusterStore::default();
        store.append_xid(&dgx(1), GpuIndex(3), XidCode(63)).unwrap();
        store.append_xid(&dgx(1), GpuIndex(3), XidCode(79)).unwrap();
        let before = store.snapshot();

        let err = store.reset_gpu(&dgx(1), GpuIndex(3)).unwrap_err();
        assert!(matches!(
            err,
            ClusterError::ResetRefused { code: XidCode(79), .. }
        ));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.gpu(&dgx(1), GpuIndex(3)).unwrap().xid_errors.len(), 2);
    }

    #[traced_test]
    #[test]
    fn test_every_fatal_code_blocks_reset() {
        for code in gpulab_types::FATAL_XID_CODES {
            let mut store = ClusterStore::default();
            store.append_xid(&dgx(0), GpuIndex(0), XidCode(code)).unwrap();
            assert!(store.reset_gpu(&dgx(0), GpuIndex(0)).is_err(), "XID {code}");
        }
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = ClusterStore::default();
        let mut snapshot = store.snapshot();
        snapshot.nodes[0].gpus[0].temperature_c = 99.0;
        assert_ne!(store.gpu(&dgx(0), GpuIndex(0)).unwrap().temperature_c, 99.0);
    }

    #[test]
    fn test_update_gpu_validates_before_writing() {
        let mut store = ClusterStore::default();
        let before = store.gpu(&dgx(0), GpuIndex(1)).unwrap().clone();

        let err = store
            .update_gpu(
                &dgx(0),
                GpuIndex(1),
                GpuUpdate::new().temperature(70.0).utilization(150),
            )
            .unwrap_err();
        assert!(matches!(err, ClusterError::InvalidValue { field: "utilization_pct", .. }));
        assert_eq!(store.gpu(&dgx(0), GpuIndex(1)).unwrap(), &before);
    }

    #[test]
    fn test_update_gpu_rederives_health() {
        let mut store = ClusterStore::default();
        store
            .update_gpu(&dgx(2), GpuIndex(5), GpuUpdate::new().temperature(86.0))
            .unwrap();
        assert_eq!(
            store.gpu(&dgx(2), GpuIndex(5)).unwrap().health,
            HealthStatus::Warning
        );

        store
            .update_gpu(&dgx(2), GpuIndex(5), GpuUpdate::new().temperature(40.0))
            .unwrap();
        assert_eq!(
            store.gpu(&dgx(2), GpuIndex(5)).unwrap().health,
            HealthStatus::Ok
        );
    }

    #[test]
    fn test_unknown_targets_are_errors() {
        let mut store = ClusterStore::default();
        assert!(matches!(
            store.append_xid(&NodeId::new("nope"), GpuIndex(0), XidCode(13)),
            Err(ClusterError::NodeNotFound(_))
        ));
        assert!(matches!(
            store.reset_gpu(&dgx(0), GpuIndex(42)),
            Err(ClusterError::GpuNotFound { .. })
        ));
        assert!(matches!(
            store.set_nvlink_status(&dgx(0), GpuIndex(0), LinkIndex(99), NvLinkStatus::Error),
            Err(ClusterError::LinkNotFound { .. })
        ));
    }

    #[test]
    fn test_xid_timestamps_follow_clock() {
        let mut store = ClusterStore::default();
        store.set_time(Duration::from_secs(120));
        store.append_xid(&dgx(0), GpuIndex(0), XidCode(13)).unwrap();
        let gpu = store.gpu(&dgx(0), GpuIndex(0)).unwrap();
        assert_eq!(gpu.xid_errors[0].timestamp_secs, 120.0);
    }

    #[test]
    fn test_slurm_reason_only_kept_for_drain_and_down() {
        let mut store = ClusterStore::default();
        store
            .set_slurm_state(&dgx(1), SlurmState::Drain, Some("xid 79".to_string()))
            .unwrap();
        assert_eq!(
            store.node(&dgx(1)).unwrap().slurm_reason.as_deref(),
            Some("xid 79")
        );
        store
            .set_slurm_state(&dgx(1), SlurmState::Idle, Some("ignored".to_string()))
            .unwrap();
        assert_eq!(store.node(&dgx(1)).unwrap().slurm_reason, None);
    }

    #[test]
    fn test_full_reset_restores_baseline() {
        let mut store = ClusterStore::default();
        let baseline = store.snapshot();
        store.advance_time(Duration::from_secs(30));
        store.append_xid(&dgx(0), GpuIndex(0), XidCode(79)).unwrap();
        store.set_chassis_power(&dgx(3), false).unwrap();

        store.reset();
        assert_eq!(store.snapshot(), baseline);
        assert_eq!(store.now(), Duration::ZERO);
    }
}
