use super::{compress_hostlist, SLURM_VERSION};
use gpulab_core::{
    check_flags, check_subcommand, help_text, store_failure, usage, CommandResult,
    ExecutionContext, Simulator, SimulatorMetadata, WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_suggest::{Suggestion, SuggestionKind};
use gpulab_types::{DgxNode, NodeId, SlurmState};
use std::fmt::Write as _;
use std::time::Duration;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "scontrol",
    version: SLURM_VERSION,
    description: "View or modify Slurm configuration and state",
    aliases: &[],
    subcommands: &["show", "update"],
    flags: &["-h", "--help", "-V", "--version", "-d", "--details", "-o", "--oneliner"],
};

const SHOW_TARGETS: [&str; 4] = ["node", "nodes", "partition", "partitions"];

/// Simulated `scontrol`.
#[derive(Debug, Default)]
pub struct Scontrol;

impl Simulator for Scontrol {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new().with_switches([
            "h",
            "help",
            "V",
            "version",
            "d",
            "details",
            "o",
            "oneliner",
        ])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_any_flag(&["h", "help"]) {
            return CommandResult::success(help_text(&METADATA));
        }
        if cmd.has_any_flag(&["V", "version"]) {
            return CommandResult::success(format!("slurm {SLURM_VERSION}\n"));
        }
        let oneliner = cmd.has_any_flag(&["o", "oneliner"]);

        match cmd.subcommand() {
            None => usage(METADATA.name, "a command is required (show, update)"),
            Some("show") => show(cmd, ctx, oneliner),
            Some("update") => update(cmd, ctx),
            Some(other) => check_subcommand(&METADATA, other)
                .err()
                .unwrap_or_else(|| usage(METADATA.name, other)),
        }
    }
}

fn show(cmd: &ParsedCommand, ctx: &ExecutionContext<'_>, oneliner: bool) -> CommandResult {
    let Some(target) = cmd.arg(1) else {
        return usage(METADATA.name, "show: an entity is required (node, partition)");
    };
    let name = cmd.arg(2);
    let cluster = ctx.store.cluster();
    let now = ctx.store.now();

    let blocks: Vec<String> = match target.to_ascii_lowercase().as_str() {
        "node" | "nodes" => {
            let nodes: Vec<&DgxNode> = match name {
                None => cluster.nodes.iter().collect(),
                Some(name) => {
                    let mut found = Vec::new();
                    for id in name.split(',') {
                        match cluster.node(&NodeId::new(id)) {
                            Some(node) => found.push(node),
                            None => {
                                return CommandResult::failure(format!("Node {id} not found\n"))
                            }
                        }
                    }
                    found
                }
            };
            nodes.into_iter().map(|n| node_block(n, now)).collect()
        }
        "partition" | "partitions" => {
            let mut partitions: Vec<&str> = Vec::new();
            for node in &cluster.nodes {
                if !partitions.contains(&node.partition.as_str()) {
                    partitions.push(&node.partition);
                }
            }
            if let Some(name) = name {
                if !partitions.contains(&name) {
                    return CommandResult::failure(format!("Partition {name} not found\n"));
                }
                partitions.retain(|p| *p == name);
            }
            let default = partitions.first().copied();
            partitions
                .iter()
                .map(|p| {
                    let members: Vec<&DgxNode> =
                        cluster.nodes.iter().filter(|n| n.partition == *p).collect();
                    partition_block(p, &members, Some(*p) == default)
                })
                .collect()
        }
        other => {
            let suggestion = Suggestion::build(
                SuggestionKind::Subcommand {
                    command: "scontrol show".to_string(),
                },
                other,
                SHOW_TARGETS,
            );
            return CommandResult::usage_error(suggestion.message());
        }
    };

    let out = if oneliner {
        blocks
            .iter()
            .map(|b| format!("{}\n", b.split_whitespace().collect::<Vec<_>>().join(" ")))
            .collect()
    } else {
        blocks.join("\n")
    };
    CommandResult::success(out)
}

/// State as shown by `scontrol show node`.
fn long_state(node: &DgxNode) -> String {
    let base = match node.slurm_state {
        SlurmState::Drain => "IDLE+DRAIN",
        other => other.as_upper(),
    };
    if node.bmc.chassis_power_on {
        base.to_string()
    } else {
        format!("{base}+NOT_RESPONDING")
    }
}

fn node_block(node: &DgxNode, now: Duration) -> String {
    let alloc = match node.slurm_state {
        SlurmState::Alloc => node.cpus,
        SlurmState::Mix => node.cpus / 2,
        _ => 0,
    };
    let boot = WallClock::at(Duration::ZERO).iso();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "NodeName={} Arch=x86_64 CoresPerSocket=64",
        node.id
    );
    let _ = writeln!(
        out,
        "   CPUAlloc={alloc} CPUEfctv={} CPUTot={} CPULoad=0.00",
        node.cpus, node.cpus
    );
    out.push_str("   AvailableFeatures=a100,dgx\n   ActiveFeatures=a100,dgx\n");
    let _ = writeln!(out, "   Gres=gpu:a100:{}", node.gpus.len());
    let _ = writeln!(
        out,
        "   NodeAddr={} NodeHostName={} Version={SLURM_VERSION}",
        node.id, node.id
    );
    let _ = writeln!(
        out,
        "   RealMemory={} AllocMem=0 FreeMem={} Sockets=2 Boards=1",
        node.memory_mb,
        node.memory_mb * 98 / 100
    );
    let _ = writeln!(
        out,
        "   State={} ThreadsPerCore=2 TmpDisk=0 Weight=1 Owner=N/A MCS_label=N/A",
        long_state(node)
    );
    let _ = writeln!(out, "   Partitions={}", node.partition);
    let _ = writeln!(out, "   BootTime={boot} SlurmdStartTime={boot}");
    if let Some(reason) = &node.slurm_reason {
        let _ = writeln!(
            out,
            "   Reason={reason} [root@{}]",
            WallClock::at(now).iso()
        );
    }
    out
}

fn partition_block(name: &str, members: &[&DgxNode], default: bool) -> String {
    let cpus: u32 = members.iter().map(|n| n.cpus).sum();
    let mut out = format!("PartitionName={name}\n");
    out.push_str("   AllowGroups=ALL AllowAccounts=ALL AllowQos=ALL\n");
    let _ = writeln!(
        out,
        "   Default={} QoS=N/A",
        if default { "YES" } else { "NO" }
    );
    out.push_str("   MaxNodes=UNLIMITED MaxTime=UNLIMITED MinNodes=0\n");
    let _ = writeln!(
        out,
        "   Nodes={}",
        compress_hostlist(members.iter().map(|n| &n.id))
    );
    let _ = writeln!(
        out,
        "   State=UP TotalCPUs={cpus} TotalNodes={}",
        members.len()
    );
    out
}

fn update(cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
    let mut nodes: Option<&str> = None;
    let mut state: Option<&str> = None;
    let mut reason: Option<&str> = None;

    for arg in &cmd.args[1..] {
        let Some((key, value)) = arg.split_once('=') else {
            return usage(METADATA.name, &format!("update: invalid input: {arg}"));
        };
        match key.to_ascii_lowercase().as_str() {
            "nodename" => nodes = Some(value),
            "state" => state = Some(value),
            "reason" => reason = Some(value),
            other => {
                return usage(METADATA.name, &format!("update: invalid keyword: {other}"));
            }
        }
    }

    let Some(nodes) = nodes else {
        return usage(METADATA.name, "update: NodeName is required");
    };
    let Some(state) = state else {
        return usage(METADATA.name, "update: State is required");
    };
    let state: SlurmState = match state.parse() {
        Ok(s) => s,
        Err(_) => {
            return CommandResult::failure(format!(
                "Invalid node state specified: {state}\n"
            ))
        }
    };
    if matches!(state, SlurmState::Drain | SlurmState::Down) && reason.is_none() {
        return CommandResult::failure(
            "You must specify a reason when DOWNING or DRAINING a node. Request denied\n",
        );
    }

    let ids: Vec<NodeId> = nodes.split(',').map(NodeId::new).collect();
    if let Some(missing) = ids.iter().find(|id| !ctx.store.has_node(id)) {
        return CommandResult::failure(format!(
            "slurm_update error: Invalid node name specified: {missing}\n"
        ));
    }
    for id in &ids {
        if let Err(err) = ctx
            .store
            .set_slurm_state(id, state, reason.map(str::to_string))
        {
            return store_failure(METADATA.name, &err);
        }
    }
    CommandResult::empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_test_helpers::{dgx, TestShell};
    use tracing_test::traced_test;

    #[test]
    fn test_show_node_singular_and_plural() {
        let mut shell = TestShell::healthy();
        let single = shell.run(&Scontrol, "scontrol show node dgx-01");
        assert_eq!(single.exit_code, 0);
        assert!(single.output.starts_with("NodeName=dgx-01"));
        assert!(single.output.contains("State=IDLE"));

        let all = shell.run(&Scontrol, "scontrol show nodes");
        assert_eq!(all.output.matches("NodeName=").count(), 4);
    }

    #[test]
    fn test_show_unknown_node() {
        let out = TestShell::healthy().run(&Scontrol, "scontrol show node dgx-42");
        assert_eq!(out.exit_code, 1);
        assert!(out.output.contains("Node dgx-42 not found"));
    }

    #[test]
    fn test_show_partition() {
        let out = TestShell::healthy().run(&Scontrol, "scontrol show partition");
        assert!(out.output.contains("PartitionName=batch"));
        assert!(out.output.contains("Nodes=dgx-[00-03]"));
        assert!(out.output.contains("TotalNodes=4"));
    }

    #[test]
    fn test_show_target_typo() {
        let out = TestShell::healthy().run(&Scontrol, "scontrol show nodez");
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("node"));
    }

    #[traced_test]
    #[test]
    fn test_drain_and_resume() {
        let mut shell = TestShell::healthy();
        let out = shell.run(
            &Scontrol,
            "scontrol update nodename=dgx-02 state=drain reason=\"GPU XID 79\"",
        );
        assert_eq!(out.exit_code, 0, "{}", out.output);
        let node = shell.store.node(&dgx(2)).unwrap();
        assert_eq!(node.slurm_state, SlurmState::Drain);
        assert_eq!(node.slurm_reason.as_deref(), Some("GPU XID 79"));

        let out = shell.run(&Scontrol, "scontrol show node dgx-02");
        assert!(out.output.contains("State=IDLE+DRAIN"));
        assert!(out.output.contains("Reason=GPU XID 79"));

        let out = shell.run(&Scontrol, "scontrol update NodeName=dgx-02 State=RESUME");
        assert_eq!(out.exit_code, 0);
        let node = shell.store.node(&dgx(2)).unwrap();
        assert_eq!(node.slurm_state, SlurmState::Idle);
        assert!(node.slurm_reason.is_none());
    }

    #[test]
    fn test_drain_requires_reason() {
        let mut shell = TestShell::healthy();
        let out = shell.run(&Scontrol, "scontrol update nodename=dgx-02 state=drain");
        assert_eq!(out.exit_code, 1);
        assert!(out.output.contains("must specify a reason"));
        assert_eq!(
            shell.store.node(&dgx(2)).unwrap().slurm_state,
            SlurmState::Idle
        );
    }

    #[test]
    fn test_update_rejects_bad_input() {
        let mut shell = TestShell::healthy();
        let out = shell.run(&Scontrol, "scontrol update nodename=dgx-09 state=idle");
        assert_eq!(out.exit_code, 1);
        let out = shell.run(&Scontrol, "scontrol update nodename=dgx-01 state=sleepy");
        assert_eq!(out.exit_code, 1);
        let out = shell.run(&Scontrol, "scontrol update nodename=dgx-01");
        assert_eq!(out.exit_code, 2);
    }
}
