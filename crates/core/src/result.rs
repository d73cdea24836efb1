//! Command results.

use gpulab_types::NodeId;
use std::time::Duration;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code for a recognized but failed or refused operation.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for unknown flags, unknown subcommands, and bad usage.
pub const EXIT_USAGE: i32 = 2;

/// Exit code for an unknown command.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Shell-level side effect requested by a command.
///
/// Simulators never touch shell state directly. They return effects and the
/// session applies them after the command completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEffect {
    /// Make a different node the current node (`ssh dgx-01`).
    SwitchNode(NodeId),
}

/// Output of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Terminal text, pre-formatted.
    pub output: String,

    /// Process-style exit code.
    pub exit_code: i32,

    /// How long the operation would take on real hardware. Reported, never
    /// slept.
    pub simulated_duration: Option<Duration>,

    /// Shell effects for the session to apply.
    pub effects: Vec<ShellEffect>,
}

impl CommandResult {
    /// Successful result.
    pub fn success(output: impl Into<String>) -> Self {
        Self::with_code(output, EXIT_SUCCESS)
    }

    /// Failed or refused operation.
    pub fn failure(output: impl Into<String>) -> Self {
        Self::with_code(output, EXIT_FAILURE)
    }

    /// Unknown flag, unknown subcommand, or bad usage.
    pub fn usage_error(output: impl Into<String>) -> Self {
        Self::with_code(output, EXIT_USAGE)
    }

    /// Unknown command.
    pub fn not_found(output: impl Into<String>) -> Self {
        Self::with_code(output, EXIT_NOT_FOUND)
    }

    /// Blank input: no output, exit 0.
    pub fn empty() -> Self {
        Self::success(String::new())
    }

    /// Result with an explicit exit code.
    pub fn with_code(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
            simulated_duration: None,
            effects: Vec::new(),
        }
    }

    /// Attach a simulated duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.simulated_duration = Some(duration);
        self
    }

    /// Attach a shell effect.
    pub fn with_effect(mut self, effect: ShellEffect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Whether the exit code is 0.
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}
