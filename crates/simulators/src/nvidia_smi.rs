//! `nvidia-smi`.

use gpulab_cluster::{ClusterError, GpuUpdate};
use gpulab_core::{
    check_flags, check_subcommand, help_text, parse_index_list, store_failure, usage,
    CommandResult, ExecutionContext, Simulator, SimulatorMetadata, WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_suggest::{find_similar_strings, DEFAULT_MAX_DISTANCE};
use gpulab_types::{
    DgxNode, Gpu, GpuIndex, NvLinkStatus, TEMPERATURE_CRITICAL_C, TEMPERATURE_WARNING_C,
    XidCode, FALLEN_OFF_BUS_MARKER, XID_FALLEN_OFF_BUS,
};
use std::fmt::Write as _;
use tracing::{debug, warn};

pub const DRIVER_VERSION: &str = "535.129.03";
pub const CUDA_VERSION: &str = "12.2";

const MIN_POWER_LIMIT_W: f64 = 100.0;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "nvidia-smi",
    version: DRIVER_VERSION,
    description: "NVIDIA System Management Interface",
    aliases: &[],
    subcommands: &["topo", "nvlink"],
    flags: &[
        "-h",
        "--help",
        "--version",
        "-L",
        "--list-gpus",
        "-q",
        "--query",
        "-d",
        "--display",
        "-i",
        "--id",
        "--query-gpu",
        "--format",
        "-r",
        "--gpu-reset",
        "-p",
        "--reset-ecc-errors",
        "-pl",
        "--power-limit",
        "-pm",
        "--persistence-mode",
        "-m",
        "--matrix",
        "-s",
        "--status",
        "-e",
        "--errorcounters",
    ],
};

/// `-d` section names.
const SECTIONS: [&str; 6] = [
    "MEMORY",
    "UTILIZATION",
    "ECC",
    "TEMPERATURE",
    "POWER",
    "PERFORMANCE",
];

/// Simulated `nvidia-smi`.
#[derive(Debug, Default)]
pub struct NvidiaSmi;

impl Simulator for NvidiaSmi {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values([
                "i",
                "id",
                "d",
                "display",
                "query-gpu",
                "format",
                "p",
                "reset-ecc-errors",
                "pl",
                "power-limit",
                "pm",
                "persistence-mode",
            ])
            .with_switches([
                "h",
                "help",
                "version",
                "L",
                "list-gpus",
                "q",
                "query",
                "r",
                "gpu-reset",
                "m",
                "matrix",
                "s",
                "status",
                "e",
                "errorcounters",
            ])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_any_flag(&["h", "help"]) {
            return CommandResult::success(help_text(&METADATA));
        }
        if cmd.has_flag("version") {
            return CommandResult::success(version_text());
        }

        let node = match ctx.node() {
            Ok(node) => node.clone(),
            Err(err) => return store_failure(METADATA.name, &err),
        };
        if !node.bmc.chassis_power_on {
            return CommandResult::failure(
                "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver. \
                 Make sure that the latest NVIDIA driver is installed and running.\n",
            );
        }

        let selected = match select_gpus(cmd, &node) {
            Ok(selected) => selected,
            Err(err) => return err,
        };

        match cmd.subcommand() {
            Some("topo") => return topo(cmd, &node),
            Some("nvlink") => return nvlink(cmd, &node, &selected),
            Some(other) => {
                if let Err(err) = check_subcommand(&METADATA, other) {
                    return err;
                }
            }
            None => {}
        }

        if cmd.has_any_flag(&["r", "gpu-reset"]) {
            return gpu_reset(cmd, ctx, &node);
        }
        if cmd.has_any_flag(&["p", "reset-ecc-errors"]) {
            return reset_ecc(cmd, ctx, &node, &selected);
        }
        if cmd.has_any_flag(&["pl", "power-limit"]) {
            return power_limit(cmd, ctx, &node, &selected);
        }
        if cmd.has_any_flag(&["pm", "persistence-mode"]) {
            return persistence_mode(cmd, ctx, &node, &selected);
        }
        if cmd.has_any_flag(&["L", "list-gpus"]) {
            return CommandResult::success(list_gpus(&node, &selected));
        }
        if cmd.has_flag("query-gpu") {
            return query_gpu(cmd, &node, &selected);
        }
        if cmd.has_any_flag(&["q", "query"]) {
            return full_query(cmd, &node, &selected, ctx.store.now());
        }
        CommandResult::success(summary(&node, &selected, ctx.store.now()))
    }
}

fn version_text() -> String {
    format!(
        "NVIDIA-SMI version  : {DRIVER_VERSION}\n\
         NVML version        : 535.129\n\
         DRIVER version      : {DRIVER_VERSION}\n\
         CUDA Version        : {CUDA_VERSION}\n"
    )
}

/// GPUs named by `-i`, or every GPU on the node.
fn select_gpus(cmd: &ParsedCommand, node: &DgxNode) -> Result<Vec<GpuIndex>, CommandResult> {
    if !cmd.has_any_flag(&["i", "id"]) {
        return Ok(node.gpus.iter().map(|g| g.index).collect());
    }
    let Some(raw) = cmd.flag_value_any(&["i", "id"]) else {
        return Err(usage(METADATA.name, "option '-i' requires an argument"));
    };
    let Some(indices) = parse_index_list(raw) else {
        return Err(usage(METADATA.name, &format!("Invalid GPU ID: {raw}")));
    };
    if indices.iter().any(|i| node.gpu(*i).is_none()) {
        return Err(CommandResult::failure("No devices were found\n"));
    }
    Ok(indices)
}

fn is_lost(gpu: &Gpu) -> bool {
    gpu.xid_errors.iter().any(|x| x.code == XID_FALLEN_OFF_BUS)
}

fn lost_line(gpu: &Gpu) -> String {
    format!(
        "Unable to determine the device handle for GPU {}: GPU is lost.  \
         Reboot the system to recover this GPU\n",
        gpu.pci_bus_id
    )
}

fn gpus<'a>(node: &'a DgxNode, selected: &'a [GpuIndex]) -> impl Iterator<Item = &'a Gpu> + 'a {
    selected.iter().filter_map(|i| node.gpu(*i))
}

// ═══════════════════════════════════════════════════════════════════════════
// Default summary
// ═══════════════════════════════════════════════════════════════════════════

const LEFT: usize = 41;
const CELL: usize = 22;
const FULL: usize = LEFT + CELL * 2 + 2;

fn summary(node: &DgxNode, selected: &[GpuIndex], now: std::time::Duration) -> String {
    let mut out = String::new();
    for gpu in gpus(node, selected).filter(|g| is_lost(g)) {
        out.push_str(&lost_line(gpu));
    }

    let border = format!("+{}+\n", "-".repeat(FULL));
    let cell_rule = |c: char, joint: char, edge: char| {
        format!(
            "{edge}{}{joint}{}{joint}{}{edge}\n",
            c.to_string().repeat(LEFT),
            c.to_string().repeat(CELL),
            c.to_string().repeat(CELL)
        )
    };

    let _ = writeln!(out, "{}", WallClock::at(now).ctime());
    out.push_str(&border);
    let _ = writeln!(
        out,
        "| {:<width$} |",
        format!(
            "NVIDIA-SMI {DRIVER_VERSION}             Driver Version: {DRIVER_VERSION}   CUDA Version: {CUDA_VERSION}"
        ),
        width = FULL - 2
    );
    out.push_str(&cell_rule('-', '+', '|'));
    let _ = writeln!(
        out,
        "|{:<LEFT$}|{:<CELL$}|{:<CELL$}|",
        " GPU  Name                 Persistence-M", " Bus-Id        Disp.A", " Volatile Uncorr. ECC"
    );
    let _ = writeln!(
        out,
        "|{:<LEFT$}|{:<CELL$}|{:<CELL$}|",
        " Fan  Temp   Perf          Pwr:Usage/Cap", "         Memory-Usage", " GPU-Util  Compute M."
    );
    let _ = writeln!(out, "|{:<LEFT$}|{:<CELL$}|{:>21} |", "", "", "MIG M.");
    out.push_str(&cell_rule('=', '+', '|'));

    for gpu in gpus(node, selected).filter(|g| !is_lost(g)) {
        let pm = if gpu.persistence_mode { "On" } else { "Off" };
        let _ = writeln!(
            out,
            "| {:>3}  {:<26} {:>7} | {:<16} {:>3} |{:>21} |",
            gpu.index.0,
            truncate(&gpu.name, 26),
            pm,
            gpu.pci_bus_id,
            "Off",
            gpu.ecc.double_bit
        );
        let _ = writeln!(
            out,
            "| {:<4}{:>5}    {:<2}{:>24} |{:>21} |{:>6}{:>15} |",
            "N/A",
            format!("{:.0}C", gpu.temperature_c),
            "P0",
            format!("{:.0}W / {:.0}W", gpu.power_draw_w, gpu.power_limit_w),
            format!("{}MiB / {}MiB", gpu.memory_used_mb, gpu.memory_total_mb),
            format!("{}%", gpu.utilization_pct),
            "Default"
        );
        let _ = writeln!(out, "|{:<LEFT$}|{:<CELL$}|{:>21} |", "", "", "Disabled");
        out.push_str(&cell_rule('-', '+', '+'));
    }

    out.push('\n');
    out.push_str(&border);
    for line in [
        "Processes:",
        " GPU   GI   CI        PID   Type   Process name                            GPU Memory",
        "       ID   ID                                                             Usage",
    ] {
        let _ = writeln!(out, "| {:<width$} |", line, width = FULL - 2);
    }
    let _ = writeln!(out, "|{}|", "=".repeat(FULL));
    let _ = writeln!(
        out,
        "| {:<width$} |",
        " No running processes found",
        width = FULL - 2
    );
    out.push_str(&border);
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max - 3).collect();
        t.push_str("...");
        t
    }
}

fn list_gpus(node: &DgxNode, selected: &[GpuIndex]) -> String {
    gpus(node, selected)
        .map(|g| format!("GPU {}: {} (UUID: {})\n", g.index, g.name, g.uuid))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// -q / -d
// ═══════════════════════════════════════════════════════════════════════════

fn kv(out: &mut String, depth: usize, key: &str, value: impl std::fmt::Display) {
    let label = format!("{}{}", "    ".repeat(depth), key);
    let _ = writeln!(out, "{label:<42}: {value}");
}

fn heading(out: &mut String, depth: usize, title: &str) {
    let _ = writeln!(out, "{}{}", "    ".repeat(depth), title);
}

fn full_query(
    cmd: &ParsedCommand,
    node: &DgxNode,
    selected: &[GpuIndex],
    now: std::time::Duration,
) -> CommandResult {
    let sections: Vec<&str> = match cmd.flag_value_any(&["d", "display"]) {
        None if cmd.has_any_flag(&["d", "display"]) => {
            return usage(METADATA.name, "option '-d' requires an argument")
        }
        None => SECTIONS.to_vec(),
        Some(raw) => {
            let mut picked = Vec::new();
            for name in raw.split(',').map(|s| s.trim().to_ascii_uppercase()) {
                match SECTIONS.iter().find(|s| **s == name) {
                    Some(s) => picked.push(*s),
                    None => return invalid_section(&name),
                }
            }
            picked
        }
    };
    let filtered = cmd.has_any_flag(&["d", "display"]);

    let mut out = String::from("\n==============NVSMI LOG==============\n\n");
    kv(&mut out, 0, "Timestamp", WallClock::at(now).ctime());
    kv(&mut out, 0, "Driver Version", DRIVER_VERSION);
    kv(&mut out, 0, "CUDA Version", CUDA_VERSION);
    out.push('\n');
    kv(&mut out, 0, "Attached GPUs", node.gpus.len());

    for gpu in gpus(node, selected) {
        if is_lost(gpu) {
            out.push_str(&lost_line(gpu));
            continue;
        }
        let _ = writeln!(out, "GPU {}", gpu.pci_bus_id);
        if !filtered {
            kv(&mut out, 1, "Product Name", &gpu.name);
            kv(&mut out, 1, "Product Brand", "NVIDIA");
            kv(&mut out, 1, "Persistence Mode", enabled(gpu.persistence_mode));
            kv(&mut out, 1, "Serial Number", &gpu.serial);
            kv(&mut out, 1, "GPU UUID", &gpu.uuid);
            kv(&mut out, 1, "Minor Number", gpu.index);
            heading(&mut out, 1, "PCI");
            kv(&mut out, 2, "Bus Id", &gpu.pci_bus_id);
        }
        for section in &sections {
            render_section(&mut out, gpu, section);
        }
        out.push('\n');
    }
    CommandResult::success(out)
}

fn invalid_section(name: &str) -> CommandResult {
    let similar = find_similar_strings(name, SECTIONS, DEFAULT_MAX_DISTANCE);
    let mut msg = format!("Invalid display type: {name}");
    if let Some(best) = similar.first() {
        let _ = write!(msg, "\nDid you mean '{best}'?");
    }
    usage(METADATA.name, &msg)
}

fn enabled(on: bool) -> &'static str {
    if on {
        "Enabled"
    } else {
        "Disabled"
    }
}

fn active(on: bool) -> &'static str {
    if on {
        "Active"
    } else {
        "Not Active"
    }
}

fn render_section(out: &mut String, gpu: &Gpu, section: &str) {
    match section {
        "MEMORY" => {
            heading(out, 1, "FB Memory Usage");
            kv(out, 2, "Total", format!("{} MiB", gpu.memory_total_mb));
            kv(out, 2, "Used", format!("{} MiB", gpu.memory_used_mb));
            kv(
                out,
                2,
                "Free",
                format!("{} MiB", gpu.memory_total_mb - gpu.memory_used_mb),
            );
        }
        "UTILIZATION" => {
            heading(out, 1, "Utilization");
            kv(out, 2, "Gpu", format!("{} %", gpu.utilization_pct));
            kv(
                out,
                2,
                "Memory",
                format!("{:.0} %", gpu.memory_utilization() * 100.0),
            );
        }
        "ECC" => {
            heading(out, 1, "ECC Mode");
            kv(out, 2, "Current", "Enabled");
            kv(out, 2, "Pending", "Enabled");
            heading(out, 1, "ECC Errors");
            heading(out, 2, "Volatile");
            kv(out, 3, "SRAM Correctable", 0);
            kv(out, 3, "SRAM Uncorrectable", 0);
            kv(out, 3, "DRAM Correctable", gpu.ecc.single_bit);
            kv(out, 3, "DRAM Uncorrectable", gpu.ecc.double_bit);
            let remaps = gpu
                .xid_errors
                .iter()
                .filter(|x| matches!(x.code.0, 63 | 64))
                .count();
            heading(out, 1, "Remapped Rows");
            kv(out, 2, "Correctable Error", remaps);
            kv(out, 2, "Uncorrectable Error", gpu.ecc.double_bit);
            kv(out, 2, "Pending", if remaps > 0 { "Yes" } else { "No" });
            kv(out, 2, "Remapping Failure Occurred", "No");
        }
        "TEMPERATURE" => {
            heading(out, 1, "Temperature");
            kv(out, 2, "GPU Current Temp", format!("{:.0} C", gpu.temperature_c));
            kv(out, 2, "GPU Shutdown Temp", "92 C");
            kv(
                out,
                2,
                "GPU Slowdown Temp",
                format!("{TEMPERATURE_CRITICAL_C:.0} C"),
            );
            kv(
                out,
                2,
                "GPU Max Operating Temp",
                format!("{TEMPERATURE_WARNING_C:.0} C"),
            );
        }
        "POWER" => {
            heading(out, 1, "GPU Power Readings");
            kv(out, 2, "Power Draw", format!("{:.2} W", gpu.power_draw_w));
            kv(
                out,
                2,
                "Current Power Limit",
                format!("{:.2} W", gpu.power_limit_w),
            );
            kv(out, 2, "Min Power Limit", format!("{MIN_POWER_LIMIT_W:.2} W"));
            kv(
                out,
                2,
                "Max Power Limit",
                format!("{:.2} W", gpu.max_power_limit_w),
            );
        }
        "PERFORMANCE" => {
            kv(out, 1, "Performance State", "P0");
            heading(out, 1, "Clocks Event Reasons");
            kv(out, 2, "Idle", active(gpu.utilization_pct == 0));
            kv(
                out,
                2,
                "SW Thermal Slowdown",
                active(gpu.temperature_c >= TEMPERATURE_WARNING_C),
            );
            kv(
                out,
                2,
                "HW Thermal Slowdown",
                active(gpu.temperature_c >= TEMPERATURE_CRITICAL_C),
            );
        }
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// --query-gpu
// ═══════════════════════════════════════════════════════════════════════════

/// Value and optional unit of one query field.
fn query_field(gpu: &Gpu, node: &DgxNode, field: &str) -> Option<(String, Option<&'static str>)> {
    let v = match field {
        "index" => (gpu.index.to_string(), None),
        "name" => (gpu.name.clone(), None),
        "uuid" => (gpu.uuid.clone(), None),
        "pci.bus_id" | "gpu_bus_id" => (gpu.pci_bus_id.clone(), None),
        "serial" => (gpu.serial.clone(), None),
        "count" => (node.gpus.len().to_string(), None),
        "driver_version" => (DRIVER_VERSION.to_string(), None),
        "pstate" => ("P0".to_string(), None),
        "temperature.gpu" => (format!("{:.0}", gpu.temperature_c), None),
        "power.draw" => (format!("{:.2}", gpu.power_draw_w), Some("W")),
        "power.limit" => (format!("{:.2}", gpu.power_limit_w), Some("W")),
        "power.max_limit" => (format!("{:.2}", gpu.max_power_limit_w), Some("W")),
        "memory.used" => (gpu.memory_used_mb.to_string(), Some("MiB")),
        "memory.total" => (gpu.memory_total_mb.to_string(), Some("MiB")),
        "memory.free" => (
            (gpu.memory_total_mb - gpu.memory_used_mb).to_string(),
            Some("MiB"),
        ),
        "utilization.gpu" => (gpu.utilization_pct.to_string(), Some("%")),
        "utilization.memory" => (
            format!("{:.0}", gpu.memory_utilization() * 100.0),
            Some("%"),
        ),
        "persistence_mode" => (enabled(gpu.persistence_mode).to_string(), None),
        "ecc.errors.corrected.volatile.total" => (gpu.ecc.single_bit.to_string(), None),
        "ecc.errors.uncorrected.volatile.total" => (gpu.ecc.double_bit.to_string(), None),
        _ => return None,
    };
    Some(v)
}

fn query_gpu(cmd: &ParsedCommand, node: &DgxNode, selected: &[GpuIndex]) -> CommandResult {
    let Some(fields) = cmd.flag_value("query-gpu") else {
        return usage(METADATA.name, "option '--query-gpu' requires a list of fields");
    };
    let Some(format) = cmd.flag_value("format") else {
        return usage(METADATA.name, "'--format' option must be specified");
    };
    let opts: Vec<&str> = format.split(',').map(str::trim).collect();
    if !opts.contains(&"csv") {
        return usage(METADATA.name, "only the csv output format is supported");
    }
    let header = !opts.contains(&"noheader");
    let units = !opts.contains(&"nounits");

    let fields: Vec<&str> = fields
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();
    let Some(probe) = node.gpus.first() else {
        return CommandResult::failure("No devices were found\n");
    };
    for field in &fields {
        if query_field(probe, node, field).is_none() {
            return usage(
                METADATA.name,
                &format!("Field \"{field}\" is not a valid field to query."),
            );
        }
    }

    let mut out = String::new();
    if header {
        let cols: Vec<String> = fields
            .iter()
            .map(|f| match query_field(probe, node, f) {
                Some((_, Some(unit))) => format!("{f} [{unit}]"),
                _ => f.to_string(),
            })
            .collect();
        let _ = writeln!(out, "{}", cols.join(", "));
    }
    for gpu in gpus(node, selected) {
        if is_lost(gpu) {
            out.push_str(&lost_line(gpu));
            continue;
        }
        let row: Vec<String> = fields
            .iter()
            .filter_map(|f| query_field(gpu, node, f))
            .map(|(value, unit)| match unit {
                Some(u) if units => format!("{value} {u}"),
                _ => value,
            })
            .collect();
        let _ = writeln!(out, "{}", row.join(", "));
    }
    CommandResult::success(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// Mutating operations
// ═══════════════════════════════════════════════════════════════════════════

fn gpu_reset(
    cmd: &ParsedCommand,
    ctx: &mut ExecutionContext<'_>,
    node: &DgxNode,
) -> CommandResult {
    if !cmd.has_any_flag(&["i", "id"]) {
        return usage(
            METADATA.name,
            "GPU reset requires a target GPU; use -i <index> to select one",
        );
    }
    // Already validated by select_gpus.
    let targets = cmd
        .flag_value_any(&["i", "id"])
        .and_then(parse_index_list)
        .unwrap_or_default();

    let bus = |index: GpuIndex| {
        node.gpu(index)
            .map(|g| g.pci_bus_id.clone())
            .unwrap_or_default()
    };

    // Any fatal target refuses the whole command before anything is reset.
    let mut out = String::new();
    for &index in &targets {
        if let Some(fatal) = node.gpu(index).and_then(Gpu::first_fatal_xid) {
            warn!(node = %node.id, gpu = %index, code = %fatal.code, "nvidia-smi reset refused");
            out.push_str(&refusal_line(&bus(index), fatal.code, &fatal.description));
        }
    }
    if !out.is_empty() {
        out.push_str("Terminating early due to previous errors.\n");
        return CommandResult::failure(out);
    }

    for &index in &targets {
        match ctx.store.reset_gpu(&node.id, index) {
            Ok(report) => {
                debug!(node = %node.id, gpu = %index, cleared = report.cleared_xids, "nvidia-smi reset");
                let _ = writeln!(out, "GPU {} was successfully reset.", bus(index));
            }
            Err(ClusterError::ResetRefused {
                code, description, ..
            }) => {
                out.push_str(&refusal_line(&bus(index), code, &description));
                out.push_str("Terminating early due to previous errors.\n");
                return CommandResult::failure(out);
            }
            Err(err) => return store_failure(METADATA.name, &err),
        }
    }
    out.push_str("All done.\n");
    CommandResult::success(out)
}

fn refusal_line(bus: &str, code: XidCode, description: &str) -> String {
    if code == XID_FALLEN_OFF_BUS {
        format!(
            "Unable to reset GPU {bus}: {FALLEN_OFF_BUS_MARKER} (XID {code}).\n\
             The GPU is not reachable from the driver. A node power cycle is required.\n"
        )
    } else {
        format!(
            "Unable to reset GPU {bus}: XID {code} ({description}) requires \
             node-level recovery.\n"
        )
    }
}

fn reset_ecc(
    cmd: &ParsedCommand,
    ctx: &mut ExecutionContext<'_>,
    node: &DgxNode,
    selected: &[GpuIndex],
) -> CommandResult {
    let kind = match cmd.flag_value_any(&["p", "reset-ecc-errors"]) {
        Some("0") => "volatile",
        Some("1") => "aggregate",
        _ => return usage(METADATA.name, "ECC error type must be 0 (volatile) or 1 (aggregate)"),
    };
    let mut out = String::new();
    for index in selected {
        if let Err(err) = ctx.store.clear_ecc(&node.id, *index) {
            return store_failure(METADATA.name, &err);
        }
        if let Some(gpu) = node.gpu(*index) {
            let _ = writeln!(
                out,
                "Reset {kind} ECC errors to zero for GPU {}.",
                gpu.pci_bus_id
            );
        }
    }
    out.push_str("All done.\n");
    CommandResult::success(out)
}

fn power_limit(
    cmd: &ParsedCommand,
    ctx: &mut ExecutionContext<'_>,
    node: &DgxNode,
    selected: &[GpuIndex],
) -> CommandResult {
    let Some(watts) = cmd
        .flag_value_any(&["pl", "power-limit"])
        .and_then(|v| v.parse::<f64>().ok())
    else {
        return usage(METADATA.name, "power limit must be a number of watts");
    };

    let mut out = String::new();
    for gpu in gpus(node, selected) {
        if !(MIN_POWER_LIMIT_W..=gpu.max_power_limit_w).contains(&watts) {
            let _ = writeln!(
                out,
                "Provided power limit {watts:.2} W is not a valid power limit which should be \
                 between {MIN_POWER_LIMIT_W:.2} W and {:.2} W for GPU {}",
                gpu.max_power_limit_w, gpu.pci_bus_id
            );
            out.push_str("Terminating early due to previous errors.\n");
            return CommandResult::failure(out);
        }
        if let Err(err) =
            ctx.store
                .update_gpu(&node.id, gpu.index, GpuUpdate::new().power_limit(watts))
        {
            return store_failure(METADATA.name, &err);
        }
        let _ = writeln!(
            out,
            "Power limit for GPU {} was set to {watts:.2} W from {:.2} W.",
            gpu.pci_bus_id, gpu.power_limit_w
        );
    }
    out.push_str("All done.\n");
    CommandResult::success(out)
}

fn persistence_mode(
    cmd: &ParsedCommand,
    ctx: &mut ExecutionContext<'_>,
    node: &DgxNode,
    selected: &[GpuIndex],
) -> CommandResult {
    let on = match cmd
        .flag_value_any(&["pm", "persistence-mode"])
        .map(str::to_ascii_uppercase)
        .as_deref()
    {
        Some("1" | "ENABLED") => true,
        Some("0" | "DISABLED") => false,
        _ => return usage(METADATA.name, "persistence mode must be 0/DISABLED or 1/ENABLED"),
    };
    let mut out = String::new();
    for gpu in gpus(node, selected) {
        if let Err(err) =
            ctx.store
                .update_gpu(&node.id, gpu.index, GpuUpdate::new().persistence_mode(on))
        {
            return store_failure(METADATA.name, &err);
        }
        let verb = if on { "Enabled" } else { "Disabled" };
        let _ = writeln!(out, "{verb} persistence mode for GPU {}.", gpu.pci_bus_id);
    }
    out.push_str("All done.\n");
    CommandResult::success(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// topo / nvlink
// ═══════════════════════════════════════════════════════════════════════════

fn topo(cmd: &ParsedCommand, node: &DgxNode) -> CommandResult {
    if !cmd.has_any_flag(&["m", "matrix"]) {
        return usage(METADATA.name, "topo: missing option -m");
    }
    let mut out = String::from("\t");
    for gpu in &node.gpus {
        let _ = write!(out, "GPU{}\t", gpu.index);
    }
    out.push_str("CPU Affinity\tNUMA Affinity\n");

    for gpu in &node.gpus {
        let _ = write!(out, "GPU{}\t", gpu.index);
        for peer in &node.gpus {
            if peer.index == gpu.index {
                out.push_str(" X \t");
                continue;
            }
            let links = gpu
                .nvlinks
                .iter()
                .filter(|l| l.remote_gpu == peer.index && l.status == NvLinkStatus::Active)
                .count();
            if links == 0 {
                out.push_str("SYS\t");
            } else {
                let _ = write!(out, "NV{links}\t");
            }
        }
        let numa = gpu.index.0 / 2;
        let lo = numa * 32;
        let _ = writeln!(
            out,
            "{}-{},{}-{}\t{}",
            lo,
            lo + 31,
            lo + 128,
            lo + 159,
            numa
        );
    }
    out.push_str(
        "\nLegend:\n\n  X    = Self\n  \
         SYS  = Connection traversing PCIe as well as the SMP interconnect between NUMA nodes (e.g., QPI/UPI)\n  \
         NV#  = Connection traversing a bonded set of # NVLinks\n",
    );
    CommandResult::success(out)
}

fn nvlink(cmd: &ParsedCommand, node: &DgxNode, selected: &[GpuIndex]) -> CommandResult {
    let status = cmd.has_any_flag(&["s", "status"]);
    let errors = cmd.has_any_flag(&["e", "errorcounters"]);
    if !status && !errors {
        return usage(METADATA.name, "nvlink: specify -s (status) or -e (error counters)");
    }

    let mut out = String::new();
    for gpu in gpus(node, selected) {
        if is_lost(gpu) {
            out.push_str(&lost_line(gpu));
            continue;
        }
        let _ = writeln!(out, "GPU {}: {} (UUID: {})", gpu.index, gpu.name, gpu.uuid);
        for link in &gpu.nvlinks {
            if status {
                match link.status {
                    NvLinkStatus::Active => {
                        let _ = writeln!(out, "\t Link {}: {:.0} GB/s", link.link, link.speed_gbps);
                    }
                    NvLinkStatus::Inactive => {
                        let _ = writeln!(out, "\t Link {}: <inactive>", link.link);
                    }
                    NvLinkStatus::Error => {
                        let _ = writeln!(out, "\t Link {}: <error>", link.link);
                    }
                }
            }
            if errors {
                let _ = writeln!(out, "\t Link {}: Replay Errors: {}", link.link, link.error_count);
                let _ = writeln!(out, "\t Link {}: Recovery Errors: 0", link.link);
                let _ = writeln!(out, "\t Link {}: CRC Errors: 0", link.link);
            }
        }
    }
    CommandResult::success(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_test_helpers::{store_with_faults, xid_fault, TestShell};
    use gpulab_types::HealthStatus;
    use tracing_test::traced_test;

    fn shell() -> TestShell {
        TestShell::healthy()
    }

    #[test]
    fn test_summary_lists_every_gpu() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi");
        assert_eq!(out.exit_code, 0);
        assert!(out.output.contains("NVIDIA-SMI 535.129.03"));
        assert_eq!(out.output.matches("00000000:").count(), 8);
        assert!(out.output.contains("No running processes found"));
    }

    #[test]
    fn test_list_gpus() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi -L");
        assert_eq!(out.output.lines().count(), 8);
        assert!(out.output.starts_with("GPU 0: NVIDIA A100-SXM4-80GB (UUID: GPU-"));
    }

    #[test]
    fn test_query_gpu_csv() {
        let out = shell().run(
            &NvidiaSmi,
            "nvidia-smi --query-gpu=index,power.limit,memory.total --format=csv -i 1",
        );
        assert_eq!(out.exit_code, 0);
        assert_eq!(
            out.output,
            "index, power.limit [W], memory.total [MiB]\n1, 400.00 W, 81920 MiB\n"
        );

        let out = shell().run(
            &NvidiaSmi,
            "nvidia-smi --query-gpu=index,power.limit --format=csv,noheader,nounits -i 0",
        );
        assert_eq!(out.output, "0, 400.00\n");
    }

    #[test]
    fn test_query_gpu_rejects_unknown_field() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi --query-gpu=bogus --format=csv");
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("\"bogus\" is not a valid field"));
    }

    #[test]
    fn test_display_filter() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi -q -d TEMPERATURE -i 0");
        assert!(out.output.contains("GPU Current Temp"));
        assert!(!out.output.contains("FB Memory Usage"));

        let out = shell().run(&NvidiaSmi, "nvidia-smi -q -d TEMPRATURE");
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("Did you mean 'TEMPERATURE'?"));
    }

    #[test]
    fn test_unknown_flag_suggests() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi --query-gpus=name --format=csv");
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("--query-gpu"));
    }

    #[test]
    fn test_unknown_subcommand_suggests() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi topoo -m");
        assert_eq!(out.exit_code, 2);
        assert!(out.output.contains("Did you mean 'topo'?"));
    }

    #[traced_test]
    #[test]
    fn test_reset_clears_recoverable_xid() {
        let mut shell = TestShell::new(store_with_faults(&[xid_fault(0, 0, 63)]));
        let out = shell.run(&NvidiaSmi, "nvidia-smi -r -i 0");
        assert_eq!(out.exit_code, 0);
        assert!(out.output.contains("was successfully reset"));
        let gpu = shell.store.gpu(&shell.node, GpuIndex(0)).unwrap();
        assert!(gpu.xid_errors.is_empty());
        assert_eq!(gpu.health, HealthStatus::Ok);
    }

    #[traced_test]
    #[test]
    fn test_reset_refused_when_fallen_off_bus() {
        let mut shell = TestShell::new(store_with_faults(&[xid_fault(0, 3, 79)]));
        let out = shell.run(&NvidiaSmi, "nvidia-smi --gpu-reset -i 3");
        assert_eq!(out.exit_code, 1);
        assert!(out.output.contains(FALLEN_OFF_BUS_MARKER));
        let gpu = shell.store.gpu(&shell.node, GpuIndex(3)).unwrap();
        assert_eq!(gpu.xid_errors.len(), 1);
    }

    #[traced_test]
    #[test]
    fn test_reset_refused_for_any_target_leaves_all_unchanged() {
        let mut shell = TestShell::new(store_with_faults(&[
            xid_fault(0, 0, 63),
            xid_fault(0, 1, 79),
        ]));
        let out = shell.run(&NvidiaSmi, "nvidia-smi -r -i 0,1");
        assert_eq!(out.exit_code, 1);
        assert!(!out.output.contains("was successfully reset"));
        assert!(out.output.contains("Terminating early"));
        let gpu0 = shell.store.gpu(&shell.node, GpuIndex(0)).unwrap();
        assert_eq!(gpu0.xid_errors.len(), 1);
        let gpu1 = shell.store.gpu(&shell.node, GpuIndex(1)).unwrap();
        assert_eq!(gpu1.xid_errors.len(), 1);
        assert!(logs_contain("nvidia-smi reset refused"));
    }

    #[test]
    fn test_reset_requires_target() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi -r");
        assert_eq!(out.exit_code, 2);
    }

    #[test]
    fn test_lost_gpu_hidden_from_summary() {
        let mut shell = TestShell::new(store_with_faults(&[xid_fault(0, 2, 79)]));
        let out = shell.run(&NvidiaSmi, "nvidia-smi");
        assert!(out.output.contains("GPU is lost"));
        assert_eq!(out.output.matches("00000000:").count(), 8);
    }

    #[test]
    fn test_power_limit_and_persistence() {
        let mut shell = shell();
        let out = shell.run(&NvidiaSmi, "nvidia-smi -i 2 -pl 300");
        assert_eq!(out.exit_code, 0, "{}", out.output);
        assert!(out.output.contains("set to 300.00 W from 400.00 W"));
        assert_eq!(
            shell.store.gpu(&shell.node, GpuIndex(2)).unwrap().power_limit_w,
            300.0
        );

        let out = shell.run(&NvidiaSmi, "nvidia-smi -i 2 -pl 900");
        assert_eq!(out.exit_code, 1);
        assert_eq!(
            shell.store.gpu(&shell.node, GpuIndex(2)).unwrap().power_limit_w,
            300.0
        );

        let out = shell.run(&NvidiaSmi, "nvidia-smi -pm 0");
        assert_eq!(out.output.matches("Disabled persistence mode").count(), 8);
    }

    #[test]
    fn test_reset_ecc() {
        let mut shell = TestShell::new(store_with_faults(&[xid_fault(0, 1, 92)]));
        assert_eq!(
            shell.store.gpu(&shell.node, GpuIndex(1)).unwrap().ecc.single_bit,
            100
        );
        let out = shell.run(&NvidiaSmi, "nvidia-smi -p 0 -i 1");
        assert_eq!(out.exit_code, 0);
        assert!(shell
            .store
            .gpu(&shell.node, GpuIndex(1))
            .unwrap()
            .ecc
            .is_clear());
    }

    #[test]
    fn test_topology_and_nvlink() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi topo -m");
        assert!(out.output.starts_with("\tGPU0\tGPU1"));
        assert!(out.output.contains("NV2"));
        assert!(out.output.contains("Legend:"));

        let mut shell = TestShell::new(store_with_faults(&[xid_fault(0, 0, 74)]));
        let out = shell.run(&NvidiaSmi, "nvidia-smi nvlink -s -i 0");
        assert!(out.output.contains("Link 0: <error>"));
        assert!(out.output.contains("Link 1: 25 GB/s"));
    }

    #[test]
    fn test_bad_gpu_index() {
        let out = shell().run(&NvidiaSmi, "nvidia-smi -i 12");
        assert_eq!(out.exit_code, 1);
        assert!(out.output.contains("No devices were found"));
    }
}
