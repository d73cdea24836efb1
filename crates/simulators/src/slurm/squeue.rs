use super::{elapsed, running_jobs, SLURM_VERSION};
use gpulab_core::{
    check_flags, help_text, CommandResult, ExecutionContext, Simulator, SimulatorMetadata,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use std::fmt::Write as _;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "squeue",
    version: SLURM_VERSION,
    description: "View information about jobs in the Slurm scheduling queue",
    aliases: &[],
    subcommands: &[],
    flags: &[
        "-u",
        "--user",
        "-w",
        "--nodelist",
        "-p",
        "--partition",
        "-h",
        "--noheader",
        "--help",
    ],
};

/// Simulated `squeue`.
#[derive(Debug, Default)]
pub struct Squeue;

impl Simulator for Squeue {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values(["u", "user", "w", "nodelist", "p", "partition"])
            .with_switches(["h", "noheader", "help"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_flag("help") {
            return CommandResult::success(help_text(&METADATA));
        }

        let user = cmd.flag_value_any(&["u", "user"]);
        let nodelist: Option<Vec<&str>> = cmd
            .flag_value_any(&["w", "nodelist"])
            .map(|w| w.split(',').map(str::trim).collect());
        let partition = cmd.flag_value_any(&["p", "partition"]);
        let time = elapsed(ctx.store.now());

        let mut out = String::new();
        if !cmd.has_any_flag(&["h", "noheader"]) {
            out.push_str(
                "             JOBID PARTITION     NAME     USER ST       TIME  NODES NODELIST(REASON)\n",
            );
        }
        for job in running_jobs(ctx.store.cluster()) {
            if user.is_some_and(|u| u != job.user)
                || partition.is_some_and(|p| p != job.partition)
                || nodelist
                    .as_ref()
                    .is_some_and(|list| !list.contains(&job.node.as_str()))
            {
                continue;
            }
            let _ = writeln!(
                out,
                "{:>18} {:>9} {:>8} {:>8} {:>2} {:>10} {:>6} {}",
                job.id,
                job.partition,
                truncate8(job.name),
                truncate8(job.user),
                "R",
                time,
                1,
                job.node
            );
        }
        CommandResult::success(out)
    }
}

fn truncate8(s: &str) -> &str {
    s.get(..8).unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_test_helpers::{dgx, TestShell};
    use gpulab_types::SlurmState;

    #[test]
    fn test_idle_cluster_has_no_jobs() {
        let out = TestShell::healthy().run(&Squeue, "squeue");
        assert_eq!(out.output.lines().count(), 1);
    }

    #[test]
    fn test_jobs_follow_allocated_nodes() {
        let mut shell = TestShell::healthy();
        shell
            .store
            .set_slurm_state(&dgx(1), SlurmState::Alloc, None)
            .unwrap();
        shell
            .store
            .set_slurm_state(&dgx(3), SlurmState::Mix, None)
            .unwrap();

        let out = shell.run(&Squeue, "squeue -h");
        assert_eq!(out.output.lines().count(), 2);
        assert!(out.output.contains("nccl_tes"));

        let out = shell.run(&Squeue, "squeue -h -w dgx-03");
        assert_eq!(out.output.lines().count(), 1);
        assert!(out.output.contains("dgx-03"));

        let out = shell.run(&Squeue, "squeue -h -u nobody");
        assert!(out.output.is_empty());
    }
}
