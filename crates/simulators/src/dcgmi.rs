//! `dcgmi`, the Data Center GPU Manager CLI.

use gpulab_core::{
    check_flags, check_subcommand, help_text, store_failure, usage, CommandResult,
    ExecutionContext, Simulator, SimulatorMetadata,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_types::{
    DgxNode, Gpu, HealthStatus, NvLinkStatus, TEMPERATURE_CRITICAL_C, TEMPERATURE_WARNING_C,
    XID_FALLEN_OFF_BUS,
};
use std::fmt::Write as _;
use std::time::Duration;

pub const DCGM_VERSION: &str = "3.1.8";

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "dcgmi",
    version: DCGM_VERSION,
    description: "NVIDIA Data Center GPU Manager command line interface",
    aliases: &[],
    subcommands: &["discovery", "health", "diag"],
    flags: &[
        "-h", "--help", "-v", "--version", "-l", "--list", "-c", "--check", "-s", "--set", "-g",
        "--group", "-r", "--run", "-i",
    ],
};

/// Simulated `dcgmi`.
#[derive(Debug, Default)]
pub struct Dcgmi;

impl Simulator for Dcgmi {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values(["s", "set", "g", "group", "r", "run", "i"])
            .with_switches(["h", "help", "v", "version", "l", "list", "c", "check"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_any_flag(&["h", "help"]) {
            return CommandResult::success(help_text(&METADATA));
        }
        if cmd.has_any_flag(&["v", "version"]) {
            return CommandResult::success(format!(
                "Version : {DCGM_VERSION}\nBuild ID : 11\nBuild Platform : Linux 4.15.0-180-generic x86_64\n"
            ));
        }

        let node = match ctx.node() {
            Ok(node) => node.clone(),
            Err(err) => return store_failure(METADATA.name, &err),
        };
        if !node.bmc.chassis_power_on {
            return CommandResult::failure(
                "Error: unable to establish a connection to the specified host: localhost\n\
                 Error: Unable to connect to host engine. Host engine connection invalid/disconnected.\n",
            );
        }

        match cmd.subcommand() {
            None => usage(METADATA.name, "a subcommand is required (discovery, health, diag)"),
            Some("discovery") => discovery(cmd, &node),
            Some("health") => health(cmd, &node),
            Some("diag") => diag(cmd, &node),
            Some(other) => check_subcommand(&METADATA, other)
                .err()
                .unwrap_or_else(|| usage(METADATA.name, other)),
        }
    }
}

fn rule() -> String {
    format!("+{}+{}+\n", "-".repeat(8), "-".repeat(70))
}

fn row(left: &str, right: &str) -> String {
    format!("| {left:<6} | {right:<68} |\n")
}

fn discovery(cmd: &ParsedCommand, node: &DgxNode) -> CommandResult {
    if !cmd.has_any_flag(&["l", "list"]) {
        return usage(METADATA.name, "discovery: specify -l to list GPUs");
    }
    let mut out = format!("{} GPUs found.\n", node.gpus.len());
    out.push_str(&rule());
    out.push_str(&row("GPU ID", "Device Information"));
    out.push_str(&rule());
    for gpu in &node.gpus {
        out.push_str(&row(&gpu.index.to_string(), &format!("Name: {}", gpu.name)));
        out.push_str(&row("", &format!("PCI Bus ID: {}", gpu.pci_bus_id)));
        out.push_str(&row("", &format!("Device UUID: {}", gpu.uuid)));
        out.push_str(&rule());
    }
    out.push_str("0 NvSwitches found.\n");
    CommandResult::success(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// Health
// ═══════════════════════════════════════════════════════════════════════════

fn dcgm_status(health: HealthStatus) -> &'static str {
    match health {
        HealthStatus::Ok => "Healthy",
        HealthStatus::Warning => "Warning",
        HealthStatus::Critical => "Failure",
    }
}

/// Incident lines for one GPU.
fn incidents(gpu: &Gpu) -> Vec<String> {
    let mut out = Vec::new();
    for xid in &gpu.xid_errors {
        out.push(format!(
            "XID {} detected on GPU {}: {}",
            xid.code, gpu.index, xid.description
        ));
    }
    if gpu.ecc.double_bit > 0 {
        out.push(format!(
            "{} double-bit ECC error(s) detected on GPU {}",
            gpu.ecc.double_bit, gpu.index
        ));
    }
    if gpu.ecc.single_bit > 0 {
        out.push(format!(
            "{} single-bit ECC error(s) detected on GPU {}",
            gpu.ecc.single_bit, gpu.index
        ));
    }
    for link in &gpu.nvlinks {
        match link.status {
            NvLinkStatus::Active => {}
            NvLinkStatus::Inactive => out.push(format!(
                "NVLink {} on GPU {} is inactive",
                link.link, gpu.index
            )),
            NvLinkStatus::Error => out.push(format!(
                "NVLink {} on GPU {} is in an error state ({} errors)",
                link.link, gpu.index, link.error_count
            )),
        }
    }
    if gpu.temperature_c >= TEMPERATURE_WARNING_C {
        out.push(format!(
            "GPU {} temperature is {:.0} C, above the {:.0} C warning threshold",
            gpu.index, gpu.temperature_c, TEMPERATURE_WARNING_C
        ));
    }
    out
}

fn health(cmd: &ParsedCommand, node: &DgxNode) -> CommandResult {
    if let Some(systems) = cmd.flag_value_any(&["s", "set"]) {
        if systems
            .chars()
            .any(|c| !matches!(c, 'a' | 'p' | 'm' | 'i' | 'n' | 't' | 'c' | 'v'))
        {
            return usage(METADATA.name, &format!("health: invalid watch systems '{systems}'"));
        }
        return CommandResult::success("Health monitor systems set successfully.\n");
    }
    if !cmd.has_any_flag(&["c", "check"]) {
        return usage(METADATA.name, "health: specify -c to check or -s to set watches");
    }

    let overall = node.worst_health();
    let mut out = String::from("Health Monitor Report\n");
    let rule = format!("+{}+{}+\n", "-".repeat(20), "-".repeat(58));
    out.push_str(&rule);
    let _ = writeln!(out, "| {:<18} | {:<56} |", "Overall Health", dcgm_status(overall));
    out.push_str(&format!("+{}+{}+\n", "=".repeat(20), "=".repeat(58)));

    for gpu in node.gpus.iter().filter(|g| g.health != HealthStatus::Ok) {
        let _ = writeln!(
            out,
            "| {:<18} | {:<56} |",
            format!("GPU ID: {}", gpu.index),
            dcgm_status(gpu.health)
        );
        for line in incidents(gpu) {
            let _ = writeln!(out, "| {:<18} | {:<56} |", "", line);
        }
        out.push_str(&rule);
    }
    if overall == HealthStatus::Ok {
        out.push_str(&rule);
    }
    CommandResult::success(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// Diagnostics
// ═══════════════════════════════════════════════════════════════════════════

/// Simulated run time for each diagnostic level.
pub fn diag_duration(level: u8) -> Duration {
    match level {
        1 => Duration::from_secs(15),
        2 => Duration::from_secs(120),
        _ => Duration::from_secs(900),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pass,
    Warn,
    Fail,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Outcome::Pass => "Pass",
            Outcome::Warn => "Warn",
            Outcome::Fail => "Fail",
        }
    }
}

fn node_outcome(node: &DgxNode, fails: impl Fn(&Gpu) -> bool) -> (Outcome, Vec<String>) {
    let failed: Vec<String> = node
        .gpus
        .iter()
        .filter(|g| fails(g))
        .map(|g| g.index.to_string())
        .collect();
    if failed.is_empty() {
        (Outcome::Pass, failed)
    } else {
        (Outcome::Fail, failed)
    }
}

fn has_xid(gpu: &Gpu, codes: &[u32]) -> bool {
    gpu.xid_errors.iter().any(|x| codes.contains(&x.code.0))
}

fn diag(cmd: &ParsedCommand, node: &DgxNode) -> CommandResult {
    let level = match cmd.flag_value_any(&["r", "run"]) {
        Some("1" | "short") => 1u8,
        Some("2" | "medium") => 2,
        Some("3" | "long") => 3,
        Some(other) => {
            return usage(
                METADATA.name,
                &format!("diag: invalid run level '{other}' (expected 1, 2 or 3)"),
            )
        }
        None => return usage(METADATA.name, "diag: specify a run level with -r"),
    };

    let mut tests: Vec<(&str, &str, Outcome, Vec<String>)> = Vec::new();
    let lost = |g: &Gpu| g.xid_errors.iter().any(|x| x.code == XID_FALLEN_OFF_BUS);

    let pm_off: Vec<String> = node
        .gpus
        .iter()
        .filter(|g| !g.persistence_mode)
        .map(|g| g.index.to_string())
        .collect();
    let pm = if pm_off.is_empty() { Outcome::Pass } else { Outcome::Warn };

    let (o, g) = node_outcome(node, |_| false);
    tests.push(("Deployment", "Denylist", o, g));
    let (o, g) = node_outcome(node, lost);
    tests.push(("Deployment", "NVML Library", o, g));
    let (o, g) = node_outcome(node, |_| false);
    tests.push(("Deployment", "CUDA Main Library", o, g));
    tests.push(("Deployment", "Persistence Mode", pm, pm_off));
    let (o, g) = node_outcome(node, |g| {
        g.ecc.double_bit > 0 || has_xid(g, &[48, 63, 64, 92, 94, 95])
    });
    tests.push(("Deployment", "Page Retirement/Row Remap", o, g));
    let (o, g) = node_outcome(node, |g| has_xid(g, &[119, 120]));
    tests.push(("Deployment", "Inforom", o, g));

    if level >= 2 {
        let (o, g) = node_outcome(node, lost);
        tests.push(("Integration", "PCIe", o, g));
        let (o, g) = node_outcome(node, |g| {
            g.nvlinks.iter().any(|l| l.status != NvLinkStatus::Active)
        });
        tests.push(("Integration", "NVLink", o, g));
        let (o, g) = node_outcome(node, |g| lost(g) || g.ecc.double_bit > 0);
        tests.push(("Hardware", "GPU Memory", o, g));
    }
    if level >= 3 {
        let (o, g) = node_outcome(node, |g| lost(g) || has_xid(g, &[13, 31, 43]));
        tests.push(("Stress", "Targeted Stress", o, g));
        let (o, g) = node_outcome(node, |g| lost(g) || g.temperature_c >= TEMPERATURE_CRITICAL_C);
        tests.push(("Stress", "Targeted Power", o, g));
        let (o, g) = node_outcome(node, |g| lost(g) || g.ecc.double_bit > 0);
        tests.push(("Stress", "Memory Bandwidth", o, g));
    }

    let mut out = String::from("Successfully ran diagnostic for group.\n");
    let rule = format!("+{}+{}+\n", "-".repeat(27), "-".repeat(46));
    out.push_str(&rule);
    let _ = writeln!(out, "| {:<25} | {:<44} |", "Diagnostic", "Result");
    out.push_str(&format!("+{}+{}+\n", "=".repeat(27), "=".repeat(46)));

    let mut failed = false;
    let mut category = "";
    for (cat, name, outcome, gpus) in &tests {
        if *cat != category {
            category = *cat;
            let _ = writeln!(out, "|-----  {:<19} -----+{}|", cat, " ".repeat(46));
        }
        let result = if gpus.is_empty() || *outcome == Outcome::Pass {
            outcome.label().to_string()
        } else {
            format!("{} - GPU: {}", outcome.label(), gpus.join(", "))
        };
        failed |= *outcome == Outcome::Fail;
        let _ = writeln!(out, "| {:<25} | {:<44} |", name, result);
    }
    out.push_str(&rule);
    let _ = writeln!(
        out,
        "Diagnostic level {level} completed in {}s (simulated).",
        diag_duration(level).as_secs()
    );

    let result = if failed {
        CommandResult::failure(out)
    } else {
        CommandResult::success(out)
    };
    result.with_duration(diag_duration(level))
}
