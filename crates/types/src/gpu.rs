//! GPU hardware model.

use crate::{GpuIndex, LinkIndex, XidError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Temperature at or above which a GPU is flagged as a warning.
pub const TEMPERATURE_WARNING_C: f64 = 83.0;

/// Temperature at or above which a GPU is flagged as critical.
pub const TEMPERATURE_CRITICAL_C: f64 = 90.0;

/// Overall GPU health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Ok => f.write_str("OK"),
            HealthStatus::Warning => f.write_str("Warning"),
            HealthStatus::Critical => f.write_str("Critical"),
        }
    }
}

/// NVLink status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NvLinkStatus {
    #[default]
    Active,
    Inactive,
    Error,
}

impl fmt::Display for NvLinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvLinkStatus::Active => f.write_str("Active"),
            NvLinkStatus::Inactive => f.write_str("Inactive"),
            NvLinkStatus::Error => f.write_str("Error"),
        }
    }
}

/// One NVLink endpoint on a GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvLink {
    /// Link index on the local GPU.
    pub link: LinkIndex,

    /// GPU index at the far end of the link (same node).
    pub remote_gpu: GpuIndex,

    /// Link state.
    pub status: NvLinkStatus,

    /// Per-link speed in GB/s when active.
    pub speed_gbps: f64,

    /// Replay/recovery error counter.
    pub error_count: u64,
}

/// ECC error counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EccCounters {
    /// Correctable (single-bit) errors.
    pub single_bit: u64,

    /// Uncorrectable (double-bit) errors.
    pub double_bit: u64,
}

impl EccCounters {
    /// Whether both counters are zero.
    pub fn is_clear(&self) -> bool {
        self.single_bit == 0 && self.double_bit == 0
    }
}

/// A single GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gpu {
    pub index: GpuIndex,
    pub name: String,
    pub uuid: String,
    pub pci_bus_id: String,
    pub serial: String,

    pub health: HealthStatus,

    /// Core temperature in °C.
    pub temperature_c: f64,

    /// Current power draw in W.
    pub power_draw_w: f64,

    /// Enforced power limit in W.
    pub power_limit_w: f64,

    /// Maximum settable power limit in W.
    pub max_power_limit_w: f64,

    pub memory_used_mb: u64,
    pub memory_total_mb: u64,

    /// GPU utilization in percent.
    pub utilization_pct: u32,

    pub persistence_mode: bool,

    pub nvlinks: Vec<NvLink>,
    pub ecc: EccCounters,
    pub xid_errors: Vec<XidError>,
}

impl Gpu {
    /// Whether any recorded XID is in the fatal set.
    pub fn has_fatal_xid(&self) -> bool {
        self.xid_errors.iter().any(XidError::is_fatal)
    }

    /// First fatal XID record, if any.
    pub fn first_fatal_xid(&self) -> Option<&XidError> {
        self.xid_errors.iter().find(|x| x.is_fatal())
    }

    /// Whether every NVLink is active.
    pub fn all_links_active(&self) -> bool {
        self.nvlinks.iter().all(|l| l.status == NvLinkStatus::Active)
    }

    /// Look up an NVLink by index.
    pub fn link(&self, link: LinkIndex) -> Option<&NvLink> {
        self.nvlinks.iter().find(|l| l.link == link)
    }

    /// Health implied by the current hardware fields.
    pub fn derived_health(&self) -> HealthStatus {
        let link_error = self.nvlinks.iter().any(|l| l.status == NvLinkStatus::Error);
        if self.has_fatal_xid()
            || self.ecc.double_bit > 0
            || link_error
            || self.temperature_c >= TEMPERATURE_CRITICAL_C
        {
            return HealthStatus::Critical;
        }

        let link_down = self.nvlinks.iter().any(|l| l.status == NvLinkStatus::Inactive);
        if !self.xid_errors.is_empty()
            || self.ecc.single_bit > 0
            || link_down
            || self.temperature_c >= TEMPERATURE_WARNING_C
        {
            return HealthStatus::Warning;
        }

        HealthStatus::Ok
    }

    /// Recompute `health` from the hardware fields.
    pub fn refresh_health(&mut self) {
        self.health = self.derived_health();
    }

    /// Memory usage as a fraction of total.
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_total_mb == 0 {
            0.0
        } else {
            self.memory_used_mb as f64 / self.memory_total_mb as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{XidCode, XidError};

    fn bare_gpu() -> Gpu {
        Gpu {
            index: GpuIndex(0),
            name: "NVIDIA A100-SXM4-80GB".to_string(),
            uuid: "GPU-test".to_string(),
            pci_bus_id: "00000000:07:00.0".to_string(),
            serial: "1650000000000".to_string(),
            health: HealthStatus::Ok,
            temperature_c: 35.0,
            power_draw_w: 60.0,
            power_limit_w: 400.0,
            max_power_limit_w: 400.0,
            memory_used_mb: 0,
            memory_total_mb: 81920,
            utilization_pct: 0,
            persistence_mode: true,
            nvlinks: vec![NvLink {
                link: LinkIndex(0),
                remote_gpu: GpuIndex(1),
                status: NvLinkStatus::Active,
                speed_gbps: 25.0,
                error_count: 0,
            }],
            ecc: EccCounters::default(),
            xid_errors: vec![],
        }
    }

    #[test]
    fn test_healthy_gpu_derives_ok() {
        assert_eq!(bare_gpu().derived_health(), HealthStatus::Ok);
    }

    #[test]
    fn test_non_fatal_xid_is_warning() {
        let mut gpu = bare_gpu();
        gpu.xid_errors.push(XidError::from_catalog(XidCode(63), 1.0));
        gpu.refresh_health();
        assert_eq!(gpu.health, HealthStatus::Warning);
    }

    #[test]
    fn test_fatal_conditions_are_critical() {
        let mut gpu = bare_gpu();
        gpu.xid_errors.push(XidError::from_catalog(XidCode(79), 1.0));
        assert_eq!(gpu.derived_health(), HealthStatus::Critical);

        let mut gpu = bare_gpu();
        gpu.temperature_c = 92.0;
        assert_eq!(gpu.derived_health(), HealthStatus::Critical);

        let mut gpu = bare_gpu();
        gpu.nvlinks[0].status = NvLinkStatus::Error;
        assert_eq!(gpu.derived_health(), HealthStatus::Critical);
    }

    #[test]
    fn test_thermal_and_link_warnings() {
        let mut gpu = bare_gpu();
        gpu.temperature_c = 84.0;
        assert_eq!(gpu.derived_health(), HealthStatus::Warning);

        let mut gpu = bare_gpu();
        gpu.nvlinks[0].status = NvLinkStatus::Inactive;
        assert_eq!(gpu.derived_health(), HealthStatus::Warning);
        assert!(!gpu.all_links_active());
    }
}
