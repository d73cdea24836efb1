//! `dmesg`: the kernel ring buffer of the current node.

use gpulab_core::{
    check_flags, help_text, store_failure, uptime_stamp, usage, CommandResult, ExecutionContext,
    Simulator, SimulatorMetadata, WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_types::{DgxNode, FALLEN_OFF_BUS_MARKER, XID_FALLEN_OFF_BUS};
use std::time::Duration;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "dmesg",
    version: "2.37.2",
    description: "Print the kernel ring buffer",
    aliases: &[],
    subcommands: &[],
    flags: &["-T", "--ctime", "-l", "--level", "-h", "--help"],
};

/// Kernel log priorities understood by `--level`.
const LEVELS: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warn", "notice", "info", "debug",
];

/// Simulated `dmesg`.
#[derive(Debug, Default)]
pub struct Dmesg;

impl Simulator for Dmesg {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values(["l", "level"])
            .with_switches(["T", "ctime", "h", "help"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_any_flag(&["h", "help"]) {
            return CommandResult::success(help_text(&METADATA));
        }

        let levels: Option<Vec<&str>> = match cmd.flag_value_any(&["l", "level"]) {
            None if cmd.has_any_flag(&["l", "level"]) => {
                return usage(METADATA.name, "option '--level' requires an argument")
            }
            None => None,
            Some(raw) => {
                let wanted: Vec<&str> = raw.split(',').map(str::trim).collect();
                if let Some(bad) = wanted.iter().find(|l| !LEVELS.contains(*l)) {
                    return usage(METADATA.name, &format!("unknown level '{bad}'"));
                }
                Some(wanted)
            }
        };

        let node = match ctx.node() {
            Ok(node) => node,
            Err(err) => return store_failure(METADATA.name, &err),
        };
        let human = cmd.has_any_flag(&["T", "ctime"]);

        let out = kernel_log(node)
            .into_iter()
            .filter(|line| levels.as_ref().map_or(true, |l| l.contains(&line.level)))
            .map(|line| {
                let stamp = if human {
                    format!(
                        "[{}]",
                        WallClock::at(Duration::from_secs_f64(line.at)).ctime()
                    )
                } else {
                    uptime_stamp(line.at)
                };
                format!("{stamp} {}\n", line.text)
            })
            .collect::<String>();
        CommandResult::success(out)
    }
}

struct LogLine {
    at: f64,
    level: &'static str,
    text: String,
}

fn kernel_log(node: &DgxNode) -> Vec<LogLine> {
    let mut lines = vec![
        LogLine {
            at: 0.0,
            level: "notice",
            text: "Linux version 5.15.0-1042-nvidia (buildd@lcy02-amd64-051) #42-Ubuntu SMP"
                .to_string(),
        },
        LogLine {
            at: 2.314_752,
            level: "warn",
            text: "nvidia: loading out-of-tree module taints kernel.".to_string(),
        },
        LogLine {
            at: 4.127_031,
            level: "info",
            text: format!(
                "NVRM: loading NVIDIA UNIX x86_64 Kernel Module  535.129.03  ({})",
                node.id
            ),
        },
    ];

    for gpu in &node.gpus {
        let pci = gpu
            .pci_bus_id
            .strip_prefix("0000")
            .unwrap_or(&gpu.pci_bus_id)
            .trim_end_matches(".0");
        for xid in &gpu.xid_errors {
            // Driver timestamps are relative to boot; keep them after the banner.
            let at = 10.0 + xid.timestamp_secs;
            lines.push(LogLine {
                at,
                level: "err",
                text: format!(
                    "NVRM: Xid (PCI:{pci}): {}, pid=0, name=none, {}",
                    xid.code, xid.description
                ),
            });
            if xid.code == XID_FALLEN_OFF_BUS {
                lines.push(LogLine {
                    at,
                    level: "err",
                    text: format!("NVRM: GPU at PCI:{pci}: {FALLEN_OFF_BUS_MARKER}."),
                });
            }
        }
    }
    lines.sort_by(|a, b| a.at.total_cmp(&b.at));
    lines
}
