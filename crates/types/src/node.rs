//! DGX node model.

use crate::{Gpu, GpuIndex, HealthStatus, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Slurm scheduler state of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlurmState {
    #[default]
    Idle,
    Alloc,
    Mix,
    Drain,
    Down,
}

impl SlurmState {
    /// Whether the scheduler can place work on the node.
    pub fn is_online(self) -> bool {
        matches!(self, SlurmState::Idle | SlurmState::Alloc | SlurmState::Mix)
    }

    /// Upper-case form used by `scontrol show node`.
    pub fn as_upper(self) -> &'static str {
        match self {
            SlurmState::Idle => "IDLE",
            SlurmState::Alloc => "ALLOCATED",
            SlurmState::Mix => "MIXED",
            SlurmState::Drain => "DRAINED",
            SlurmState::Down => "DOWN",
        }
    }
}

impl fmt::Display for SlurmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlurmState::Idle => f.write_str("idle"),
            SlurmState::Alloc => f.write_str("alloc"),
            SlurmState::Mix => f.write_str("mix"),
            SlurmState::Drain => f.write_str("drain"),
            SlurmState::Down => f.write_str("down"),
        }
    }
}

/// Error returned when a Slurm state name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node state: {0}")]
pub struct InvalidSlurmState(pub String);

impl FromStr for SlurmState {
    type Err = InvalidSlurmState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" | "resume" | "undrain" => Ok(SlurmState::Idle),
            "alloc" | "allocated" => Ok(SlurmState::Alloc),
            "mix" | "mixed" => Ok(SlurmState::Mix),
            "drain" | "drained" | "draining" => Ok(SlurmState::Drain),
            "down" => Ok(SlurmState::Down),
            other => Err(InvalidSlurmState(other.to_string())),
        }
    }
}

/// Baseboard management controller readings for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BmcState {
    pub chassis_power_on: bool,
    pub inlet_temp_c: f64,
    pub exhaust_temp_c: f64,
    pub fan_rpm: Vec<u32>,
    pub psu_ok: Vec<bool>,

    /// System event log lines, oldest first.
    pub sel: Vec<SelEntry>,
}

/// One System Event Log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelEntry {
    pub id: u32,
    pub timestamp_secs: f64,
    pub sensor: String,
    pub event: String,
    pub asserted: bool,
}

/// One DGX system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DgxNode {
    pub id: NodeId,
    pub model: String,
    pub slurm_state: SlurmState,

    /// Reason recorded when a node was drained or downed.
    pub slurm_reason: Option<String>,

    /// Slurm partition the node belongs to.
    pub partition: String,

    pub cpus: u32,
    pub memory_mb: u64,

    pub gpus: Vec<Gpu>,
    pub bmc: BmcState,
}

impl DgxNode {
    /// Look up a GPU by index.
    pub fn gpu(&self, index: GpuIndex) -> Option<&Gpu> {
        self.gpus.iter().find(|g| g.index == index)
    }

    /// Mutable GPU lookup.
    pub fn gpu_mut(&mut self, index: GpuIndex) -> Option<&mut Gpu> {
        self.gpus.iter_mut().find(|g| g.index == index)
    }

    /// Worst health across all GPUs.
    pub fn worst_health(&self) -> HealthStatus {
        self.gpus
            .iter()
            .map(|g| g.health)
            .max()
            .unwrap_or(HealthStatus::Ok)
    }

    /// Total XID records across all GPUs.
    pub fn xid_count(&self) -> usize {
        self.gpus.iter().map(|g| g.xid_errors.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slurm_state_parsing() {
        assert_eq!("RESUME".parse::<SlurmState>(), Ok(SlurmState::Idle));
        assert_eq!("drain".parse::<SlurmState>(), Ok(SlurmState::Drain));
        assert!("sideways".parse::<SlurmState>().is_err());
    }

    #[test]
    fn test_online_states() {
        assert!(SlurmState::Idle.is_online());
        assert!(SlurmState::Alloc.is_online());
        assert!(!SlurmState::Drain.is_online());
        assert!(!SlurmState::Down.is_online());
    }
}
