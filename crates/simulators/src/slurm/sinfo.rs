use super::{compress_hostlist, short_state, SLURM_VERSION};
use gpulab_core::{
    check_flags, help_text, CommandResult, ExecutionContext, Simulator, SimulatorMetadata,
    WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_types::DgxNode;
use std::fmt::Write as _;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "sinfo",
    version: SLURM_VERSION,
    description: "View information about Slurm nodes and partitions",
    aliases: &[],
    subcommands: &[],
    flags: &[
        "-N",
        "--Node",
        "-l",
        "--long",
        "-R",
        "--list-reasons",
        "-e",
        "--exact",
        "-h",
        "--noheader",
        "-p",
        "--partition",
        "--help",
        "-V",
        "--version",
    ],
};

/// Simulated `sinfo`.
#[derive(Debug, Default)]
pub struct Sinfo;

impl Simulator for Sinfo {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new().with_values(["p", "partition"]).with_switches([
            "N",
            "Node",
            "l",
            "long",
            "R",
            "list-reasons",
            "e",
            "exact",
            "h",
            "noheader",
            "help",
            "V",
            "version",
        ])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_flag("help") {
            return CommandResult::success(help_text(&METADATA));
        }
        if cmd.has_any_flag(&["V", "version"]) {
            return CommandResult::success(format!("slurm {SLURM_VERSION}\n"));
        }

        let partition = cmd.flag_value_any(&["p", "partition"]);
        let nodes: Vec<&DgxNode> = ctx
            .store
            .cluster()
            .nodes
            .iter()
            .filter(|n| partition.map_or(true, |p| n.partition == p))
            .collect();
        let header = !cmd.has_any_flag(&["h", "noheader"]);
        let long = cmd.has_any_flag(&["l", "long"]);

        let out = if cmd.has_any_flag(&["R", "list-reasons"]) {
            reasons(&nodes, header, ctx.store.now())
        } else if cmd.has_any_flag(&["N", "Node"]) {
            node_view(&nodes, header, long)
        } else {
            partition_view(&nodes, header, long)
        };
        CommandResult::success(out)
    }
}

fn partition_view(nodes: &[&DgxNode], header: bool, long: bool) -> String {
    let mut out = String::new();
    if header {
        if long {
            out.push_str(
                "PARTITION AVAIL  TIMELIMIT   JOB_SIZE ROOT OVERSUBS     GROUPS  NODES       STATE NODELIST\n",
            );
        } else {
            out.push_str("PARTITION AVAIL  TIMELIMIT  NODES  STATE NODELIST\n");
        }
    }

    // (partition, state) groups in first-seen order.
    let mut groups: Vec<((String, String), Vec<&DgxNode>)> = Vec::new();
    for node in nodes {
        let key = (node.partition.clone(), short_state(node));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(node),
            None => groups.push((key, vec![node])),
        }
    }

    let default_partition = nodes.first().map(|n| n.partition.clone());
    for ((partition, state), members) in groups {
        let name = if Some(&partition) == default_partition.as_ref() {
            format!("{partition}*")
        } else {
            partition
        };
        let list = compress_hostlist(members.iter().map(|n| &n.id));
        if long {
            let _ = writeln!(
                out,
                "{:<9} {:>5} {:>10} {:>10} {:>4} {:>8} {:>10} {:>6} {:>11} {}",
                name,
                "up",
                "infinite",
                "1-infinite",
                "no",
                "NO",
                "all",
                members.len(),
                state,
                list
            );
        } else {
            let _ = writeln!(
                out,
                "{:<9} {:>5} {:>10} {:>6} {:>6} {}",
                name,
                "up",
                "infinite",
                members.len(),
                state,
                list
            );
        }
    }
    out
}

fn node_view(nodes: &[&DgxNode], header: bool, long: bool) -> String {
    let mut out = String::new();
    if header {
        if long {
            out.push_str(
                "NODELIST   NODES PARTITION       STATE CPUS    S:C:T MEMORY TMP_DISK WEIGHT AVAIL_FE REASON\n",
            );
        } else {
            out.push_str("NODELIST   NODES PARTITION STATE\n");
        }
    }
    for node in nodes {
        if long {
            let _ = writeln!(
                out,
                "{:<10} {:>5} {:>9} {:>11} {:>4} {:>8} {:>6} {:>8} {:>6} {:>8} {}",
                node.id,
                1,
                node.partition,
                short_state(node),
                node.cpus,
                "2:64:2",
                node.memory_mb,
                0,
                1,
                "a100",
                node.slurm_reason.as_deref().unwrap_or("none")
            );
        } else {
            let _ = writeln!(
                out,
                "{:<10} {:>5} {:>9} {}",
                node.id,
                1,
                node.partition,
                short_state(node)
            );
        }
    }
    out
}

fn reasons(nodes: &[&DgxNode], header: bool, now: std::time::Duration) -> String {
    let mut out = String::new();
    if header {
        out.push_str("REASON               USER      TIMESTAMP           NODELIST\n");
    }
    let stamp = WallClock::at(now).iso();
    for node in nodes {
        if let Some(reason) = &node.slurm_reason {
            let _ = writeln!(out, "{:<20} {:<9} {} {}", reason, "root", stamp, node.id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_cluster::FaultSpec;
    use gpulab_test_helpers::{dgx, store_with_faults, TestShell};

    #[test]
    fn test_partition_summary_healthy() {
        let out = TestShell::healthy().run(&Sinfo, "sinfo");
        assert_eq!(
            out.output,
            "PARTITION AVAIL  TIMELIMIT  NODES  STATE NODELIST\n\
             batch*       up   infinite      4   idle dgx-[00-03]\n"
        );
    }

    #[test]
    fn test_drained_node_split_out() {
        let mut shell = TestShell::new(store_with_faults(&[FaultSpec::NodeDrain {
            node: dgx(2),
            reason: "XID 79".to_string(),
        }]));
        let out = shell.run(&Sinfo, "sinfo");
        assert!(out.output.contains("idle dgx-[00-01,03]"));
        assert!(out.output.contains("drain dgx-02"));

        let out = shell.run(&Sinfo, "sinfo -R");
        assert!(out.output.contains("XID 79"));
        assert!(out.output.contains("dgx-02"));
    }

    #[test]
    fn test_node_oriented() {
        let out = TestShell::healthy().run(&Sinfo, "sinfo -N -h");
        assert_eq!(out.output.lines().count(), 4);
        assert!(out.output.starts_with("dgx-00"));

        let out = TestShell::healthy().run(&Sinfo, "sinfo -Nl");
        assert!(out.output.contains("CPUS"));
    }

    #[test]
    fn test_power_loss_marks_not_responding() {
        let mut shell = TestShell::new(store_with_faults(&[FaultSpec::PowerLoss { node: dgx(1) }]));
        let out = shell.run(&Sinfo, "sinfo");
        assert!(out.output.contains("down* dgx-01"));
    }
}
