//! Simulated datacenter GPU tools.
//!
//! Every simulator implements [`gpulab_core::Simulator`]: it reads and
//! mutates hardware only through the [`ExecutionContext`] it is handed and
//! returns pre-formatted terminal text with an exit code. Output is a pure
//! function of cluster state and the store clock.
//!
//! [`SimulatorRegistry`] maps command names to simulators, runs pipelines
//! through the [`filters`], and turns unknown commands into suggestions.
//!
//! [`ExecutionContext`]: gpulab_core::ExecutionContext

mod dcgmi;
mod dmesg;
pub mod filters;
mod ipmitool;
mod nvidia_smi;
mod registry;
mod shell;
mod slurm;

pub use dcgmi::{diag_duration, Dcgmi, DCGM_VERSION};
pub use dmesg::Dmesg;
pub use ipmitool::Ipmitool;
pub use nvidia_smi::{NvidiaSmi, CUDA_VERSION, DRIVER_VERSION};
pub use registry::{SimulatorRegistry, HELP_COMMAND};
pub use shell::{Hostname, Ssh};
pub use slurm::{compress_hostlist, Scontrol, Sinfo, Squeue, SLURM_VERSION};
