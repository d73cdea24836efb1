//! Shell builtins that act on the session rather than on hardware.

use gpulab_core::{
    check_flags, help_text, usage, CommandResult, ExecutionContext, ShellEffect, Simulator,
    SimulatorMetadata, WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_types::NodeId;
use tracing::info;

// ═══════════════════════════════════════════════════════════════════════════
// ssh
// ═══════════════════════════════════════════════════════════════════════════

static SSH_METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "ssh",
    version: "OpenSSH_8.9p1",
    description: "Log into another node of the cluster",
    aliases: &[],
    subcommands: &[],
    flags: &["-l", "-p", "-i", "-o", "-q", "-v", "--help"],
};

/// Simulated `ssh`. Moves the shell to another node.
#[derive(Debug, Default)]
pub struct Ssh;

impl Simulator for Ssh {
    fn metadata(&self) -> &SimulatorMetadata {
        &SSH_METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values(["l", "p", "i", "o"])
            .with_switches(["q", "v", "help"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&SSH_METADATA, cmd) {
            return err;
        }
        if cmd.has_flag("help") {
            return CommandResult::success(help_text(&SSH_METADATA));
        }

        let target = match cmd.args.as_slice() {
            [] => return usage("ssh", "missing destination"),
            [target] => target,
            [_, ..] => return usage("ssh", "remote commands are not supported; log in first"),
        };
        let host = target.rsplit_once('@').map_or(target.as_str(), |(_, h)| h);
        let node = NodeId::new(host);

        let powered = match ctx.store.node(&node) {
            Ok(n) => n.bmc.chassis_power_on,
            Err(_) => {
                return CommandResult::failure(format!(
                    "ssh: Could not resolve hostname {host}: Name or service not known\n"
                ))
            }
        };
        if !powered {
            return CommandResult::failure(format!(
                "ssh: connect to host {host} port 22: No route to host\n"
            ));
        }
        if &node == ctx.current_node {
            return CommandResult::success(String::new());
        }

        info!(from = %ctx.current_node, to = %node, "ssh switching node");
        let banner = format!(
            "Welcome to NVIDIA DGX Server Version 6.1.0 (GNU/Linux 5.15.0-1042-nvidia x86_64)\n\n\
             Last login: {} from 10.0.0.1\n",
            WallClock::at(ctx.store.now()).ctime()
        );
        CommandResult::success(banner).with_effect(ShellEffect::SwitchNode(node))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// hostname
// ═══════════════════════════════════════════════════════════════════════════

static HOSTNAME_METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "hostname",
    version: "3.23",
    description: "Show the current node's name",
    aliases: &[],
    subcommands: &[],
    flags: &["-s", "--short", "-f", "--fqdn", "--help"],
};

/// Simulated `hostname`.
#[derive(Debug, Default)]
pub struct Hostname;

impl Simulator for Hostname {
    fn metadata(&self) -> &SimulatorMetadata {
        &HOSTNAME_METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new().with_switches(["s", "short", "f", "fqdn", "help"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&HOSTNAME_METADATA, cmd) {
            return err;
        }
        if cmd.has_flag("help") {
            return CommandResult::success(help_text(&HOSTNAME_METADATA));
        }
        if !cmd.args.is_empty() {
            return CommandResult::failure("hostname: you must be root to change the host name\n");
        }
        if cmd.has_any_flag(&["f", "fqdn"]) {
            let domain = ctx.store.cluster().name.clone();
            return CommandResult::success(format!("{}.{domain}.local\n", ctx.current_node));
        }
        CommandResult::success(format!("{}\n", ctx.current_node))
    }
}
