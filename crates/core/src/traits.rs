//! Core traits for tool simulators.

use crate::{CommandResult, ExecutionContext, SimulatorMetadata};
use gpulab_parser::{FlagSpec, ParsedCommand};

/// A simulated CLI tool.
///
/// This is the core abstraction of gpulab. Every tool (`nvidia-smi`,
/// `dcgmi`, `sinfo`, ...) is a simulator that:
///
/// - **Synchronous**: No async, no `.await`
/// - **Deterministic**: Same cluster state + command = same output
/// - **Explicit about mutation**: Changes cluster state only through the
///   store in the execution context, and reports the post-mutation state
///
/// # Example
///
/// ```ignore
/// impl Simulator for HostnameSimulator {
///     fn metadata(&self) -> &SimulatorMetadata {
///         &METADATA
///     }
///
///     fn execute(&self, _cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
///         CommandResult::success(format!("{}\n", ctx.current_node))
///     }
/// }
/// ```
pub trait Simulator: Send + Sync {
    /// Static description of the tool.
    fn metadata(&self) -> &SimulatorMetadata;

    /// Flag declarations used to parse this tool's command lines.
    ///
    /// The default declares nothing, so the parser's default rule applies.
    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::default()
    }

    /// Run a parsed command.
    ///
    /// # Guarantees
    ///
    /// - **Total**: Never panics; unknown flags and refused operations become
    ///   non-zero exit codes with an explanatory message
    /// - **Deterministic**: Output depends only on the command and the state
    ///   visible through `ctx`
    ///
    /// # Arguments
    ///
    /// * `cmd` - The parsed command; `cmd.base` is this tool's name or alias
    /// * `ctx` - Cluster store plus shell state (current node, environment)
    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult;
}
