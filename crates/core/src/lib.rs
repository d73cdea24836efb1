//! Core abstractions for gpulab tool simulators.
//!
//! Every simulated CLI tool implements [`Simulator`]: it receives a
//! [`ParsedCommand`](gpulab_parser::ParsedCommand) and an
//! [`ExecutionContext`], may mutate the cluster through the context's store,
//! and returns a [`CommandResult`]. Shell-level changes (switching nodes) are
//! returned as [`ShellEffect`]s for the session to apply.

mod clock;
mod context;
mod helpers;
mod metadata;
mod result;
mod traits;

pub use clock::{uptime_stamp, WallClock, BOOT_UNIX_SECS};
pub use context::ExecutionContext;
pub use helpers::{
    check_flags, check_subcommand, display_flag, help_text, parse_index_list, store_failure, usage,
};
pub use metadata::SimulatorMetadata;
pub use result::{
    CommandResult, ShellEffect, EXIT_FAILURE, EXIT_NOT_FOUND, EXIT_SUCCESS, EXIT_USAGE,
};
pub use traits::Simulator;
