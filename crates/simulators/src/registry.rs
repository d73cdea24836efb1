//! Name → simulator dispatch.

use crate::filters::apply_pipeline;
use crate::{Dcgmi, Dmesg, Hostname, Ipmitool, NvidiaSmi, Scontrol, Sinfo, Squeue, Ssh};
use gpulab_core::{help_text, CommandResult, ExecutionContext, Simulator, EXIT_NOT_FOUND};
use gpulab_parser::{parse, parse_with, peek_base, ParsedCommand};
use gpulab_suggest::{Suggestion, SuggestionKind};
use indexmap::IndexMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Name of the builtin that lists registered commands.
pub const HELP_COMMAND: &str = "help";

/// Every known simulator, looked up by name or alias.
///
/// Lookup is exact and case-sensitive. Registering a name twice replaces the
/// earlier binding.
pub struct SimulatorRegistry {
    simulators: Vec<Box<dyn Simulator>>,
    by_name: IndexMap<&'static str, usize>,
}

impl Default for SimulatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SimulatorRegistry {
    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            simulators: Vec::new(),
            by_name: IndexMap::new(),
        }
    }

    /// Registry with every built-in simulator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(NvidiaSmi));
        registry.register(Box::new(Dcgmi));
        registry.register(Box::new(Sinfo));
        registry.register(Box::new(Squeue));
        registry.register(Box::new(Scontrol));
        registry.register(Box::new(Ipmitool));
        registry.register(Box::new(Dmesg));
        registry.register(Box::new(Ssh));
        registry.register(Box::new(Hostname));
        registry
    }

    /// Add a simulator under its name and aliases.
    pub fn register(&mut self, simulator: Box<dyn Simulator>) {
        let index = self.simulators.len();
        for name in simulator.metadata().names() {
            if self.by_name.insert(name, index).is_some() {
                warn!(name, "Replacing registered simulator");
            }
        }
        self.simulators.push(simulator);
    }

    /// Simulator registered under `name`.
    pub fn get(&self, name: &str) -> Option<&dyn Simulator> {
        self.by_name
            .get(name)
            .map(|&i| self.simulators[i].as_ref())
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.by_name.keys().copied()
    }

    /// Parse a line with the flag declarations of the simulator it names.
    ///
    /// Lines naming no known simulator get the default flag rule.
    pub fn parse(&self, line: &str) -> ParsedCommand {
        match peek_base(line).and_then(|base| self.get(&base)) {
            Some(sim) => parse_with(line, &sim.flag_spec()),
            None => parse(line),
        }
    }

    /// Run an already-parsed command.
    ///
    /// When the command is a pipeline, the first stage's output runs through
    /// each filter in turn and the last stage's exit code wins. A failing
    /// first stage is returned unfiltered.
    pub fn dispatch(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if cmd.is_empty() {
            return CommandResult::empty();
        }

        let first = if cmd.base == HELP_COMMAND {
            self.help(cmd.arg(0))
        } else {
            match self.get(&cmd.base) {
                Some(sim) => sim.execute(cmd, ctx),
                None => {
                    debug!(command = %cmd.base, "Unknown command");
                    let candidates = self.names().chain(std::iter::once(HELP_COMMAND));
                    let suggestion = Suggestion::build(SuggestionKind::Command, &cmd.base, candidates);
                    return CommandResult::with_code(suggestion.message(), EXIT_NOT_FOUND);
                }
            }
        };

        debug!(
            command = %cmd.base,
            exit_code = first.exit_code,
            stages = cmd.pipeline.len().max(1),
            "Dispatched command"
        );

        apply_pipeline(cmd, first)
    }

    /// Parse and run a line.
    pub fn execute(&self, line: &str, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        let cmd = self.parse(line);
        self.dispatch(&cmd, ctx)
    }

    fn help(&self, topic: Option<&str>) -> CommandResult {
        if let Some(topic) = topic {
            return match self.get(topic) {
                Some(sim) => CommandResult::success(help_text(sim.metadata())),
                None => CommandResult::failure(format!("help: no help topics match '{topic}'\n")),
            };
        }
        let mut out = String::from("Available commands:\n");
        for sim in &self.simulators {
            let meta = sim.metadata();
            let _ = writeln!(out, "  {:<12} {}", meta.name, meta.description);
        }
        out.push_str("\nPipe output through grep, head, tail, wc, or sort.\n");
        CommandResult::success(out)
    }
}
