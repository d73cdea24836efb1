//! `ipmitool`, talking to the node's BMC.

use gpulab_core::{
    check_flags, check_subcommand, help_text, store_failure, usage, CommandResult,
    ExecutionContext, Simulator, SimulatorMetadata, WallClock,
};
use gpulab_parser::{FlagSpec, ParsedCommand};
use gpulab_types::{DgxNode, NodeId, SlurmState, TEMPERATURE_CRITICAL_C, TEMPERATURE_WARNING_C};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

static METADATA: SimulatorMetadata = SimulatorMetadata {
    name: "ipmitool",
    version: "1.8.18",
    description: "Utility for controlling IPMI-enabled devices",
    aliases: &[],
    subcommands: &["sensor", "sdr", "chassis", "sel", "mc"],
    flags: &["-I", "-H", "-U", "-P", "-h", "--help", "-V"],
};

/// Inlet temperature thresholds, °C.
const INLET_WARNING_C: f64 = 35.0;
const INLET_CRITICAL_C: f64 = 40.0;

/// Simulated `ipmitool`.
#[derive(Debug, Default)]
pub struct Ipmitool;

impl Simulator for Ipmitool {
    fn metadata(&self) -> &SimulatorMetadata {
        &METADATA
    }

    fn flag_spec(&self) -> FlagSpec {
        FlagSpec::new()
            .with_values(["I", "H", "U", "P"])
            .with_switches(["h", "help", "V"])
    }

    fn execute(&self, cmd: &ParsedCommand, ctx: &mut ExecutionContext<'_>) -> CommandResult {
        if let Err(err) = check_flags(&METADATA, cmd) {
            return err;
        }
        if cmd.has_any_flag(&["h", "help"]) {
            return CommandResult::success(help_text(&METADATA));
        }
        if cmd.has_flag("V") {
            return CommandResult::success("ipmitool version 1.8.18\n");
        }

        let target = match bmc_target(cmd, ctx) {
            Ok(target) => target,
            Err(err) => return err,
        };
        let node = match ctx.store.node(&target) {
            Ok(node) => node.clone(),
            Err(err) => return store_failure(METADATA.name, &err),
        };

        let sub = match cmd.subcommand() {
            Some(sub) => sub,
            None => return usage(METADATA.name, "a command is required"),
        };
        if let Err(err) = check_subcommand(&METADATA, sub) {
            return err;
        }
        let rest: Vec<&str> = cmd.args[1..].iter().map(String::as_str).collect();

        match sub {
            "sensor" => sensor(&node, &rest),
            "sdr" => sdr(&node, &rest),
            "chassis" => chassis(ctx, &node, &rest),
            "sel" => sel(ctx, &node, &rest),
            _ => mc(&rest),
        }
    }
}

/// Node addressed by `-H`, or the current node for in-band access.
fn bmc_target(cmd: &ParsedCommand, ctx: &ExecutionContext<'_>) -> Result<NodeId, CommandResult> {
    let Some(host) = cmd.flag_value("H") else {
        return Ok(ctx.current_node.clone());
    };
    if let Some(interface) = cmd.flag_value("I") {
        if interface != "lanplus" && interface != "lan" {
            return Err(usage(
                METADATA.name,
                &format!("Invalid interface: {interface}"),
            ));
        }
    }
    let id = NodeId::new(host.strip_suffix("-bmc").unwrap_or(host));
    if ctx.store.has_node(&id) {
        Ok(id)
    } else {
        Err(CommandResult::failure(
            "Error: Unable to establish IPMI v2 / RMCP+ session\n",
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Sensors
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorType {
    Temperature,
    Fan,
    PowerSupply,
}

struct Reading {
    name: String,
    kind: SensorType,
    value: Option<f64>,
    unit: &'static str,
    status: &'static str,
}

fn temp_status(value: f64, warning: f64, critical: f64) -> &'static str {
    if value >= critical {
        "cr"
    } else if value >= warning {
        "nc"
    } else {
        "ok"
    }
}

fn readings(node: &DgxNode) -> Vec<Reading> {
    let on = node.bmc.chassis_power_on;
    let mut out = vec![
        Reading {
            name: "Inlet Temp".into(),
            kind: SensorType::Temperature,
            value: Some(node.bmc.inlet_temp_c),
            unit: "degrees C",
            status: temp_status(node.bmc.inlet_temp_c, INLET_WARNING_C, INLET_CRITICAL_C),
        },
        Reading {
            name: "Exhaust Temp".into(),
            kind: SensorType::Temperature,
            value: on.then_some(node.bmc.exhaust_temp_c),
            unit: "degrees C",
            status: if on { "ok" } else { "ns" },
        },
    ];
    for gpu in &node.gpus {
        out.push(Reading {
            name: format!("GPU{} Temp", gpu.index),
            kind: SensorType::Temperature,
            value: on.then_some(gpu.temperature_c),
            unit: "degrees C",
            status: if on {
                temp_status(gpu.temperature_c, TEMPERATURE_WARNING_C, TEMPERATURE_CRITICAL_C)
            } else {
                "ns"
            },
        });
    }
    for (i, rpm) in node.bmc.fan_rpm.iter().enumerate() {
        out.push(Reading {
            name: format!("FAN{}", i + 1),
            kind: SensorType::Fan,
            value: on.then_some(f64::from(*rpm)),
            unit: "RPM",
            status: if on { "ok" } else { "ns" },
        });
    }
    for (i, ok) in node.bmc.psu_ok.iter().enumerate() {
        out.push(Reading {
            name: format!("PSU{} Status", i + 1),
            kind: SensorType::PowerSupply,
            value: Some(if *ok { 1.0 } else { 0.0 }),
            unit: "discrete",
            status: if *ok { "ok" } else { "cr" },
        });
    }
    out
}

fn sensor(node: &DgxNode, rest: &[&str]) -> CommandResult {
    match rest.first() {
        None | Some(&"list") => {}
        Some(other) => return usage(METADATA.name, &format!("sensor: invalid command '{other}'")),
    }
    let mut out = String::new();
    for r in readings(node) {
        let value = match (r.value, r.kind) {
            (None, _) => "na".to_string(),
            (Some(v), SensorType::PowerSupply) => format!("0x{:02x}", v as u8),
            (Some(v), _) => format!("{v:.3}"),
        };
        let _ = writeln!(
            out,
            "{:<16} | {:<10} | {:<10} | {:<5} | na        | na        | na        | na        | na        | na",
            r.name, value, r.unit, r.status
        );
    }
    CommandResult::success(out)
}

fn sdr(node: &DgxNode, rest: &[&str]) -> CommandResult {
    let filter = match rest {
        [] | ["list"] | ["elist"] => None,
        ["type", kind @ ..] if !kind.is_empty() => {
            match kind.join(" ").to_ascii_lowercase().as_str() {
                "temperature" => Some(SensorType::Temperature),
                "fan" => Some(SensorType::Fan),
                "power supply" => Some(SensorType::PowerSupply),
                other => {
                    return usage(
                        METADATA.name,
                        &format!("sdr: invalid sensor type '{other}'"),
                    )
                }
            }
        }
        _ => return usage(METADATA.name, "sdr: expected 'list' or 'type <sensor type>'"),
    };

    let mut out = String::new();
    for r in readings(node)
        .into_iter()
        .filter(|r| filter.map_or(true, |f| f == r.kind))
    {
        let value = match (r.value, r.kind) {
            (None, _) => "no reading".to_string(),
            (Some(v), SensorType::PowerSupply) => {
                let text = if v > 0.0 {
                    "Presence detected"
                } else {
                    "Failure detected"
                };
                text.to_string()
            }
            (Some(v), _) => format!("{v:.0} {}", r.unit),
        };
        let _ = writeln!(out, "{:<16} | {:<17} | {}", r.name, value, r.status);
    }
    CommandResult::success(out)
}

// ═══════════════════════════════════════════════════════════════════════════
// Chassis
// ═══════════════════════════════════════════════════════════════════════════

fn chassis(ctx: &mut ExecutionContext<'_>, node: &DgxNode, rest: &[&str]) -> CommandResult {
    match rest {
        ["status"] => {
            let fan_fault = node.bmc.fan_rpm.iter().any(|rpm| *rpm == 0);
            let mut out = String::new();
            let on = if node.bmc.chassis_power_on { "on" } else { "off" };
            for (k, v) in [
                ("System Power", on),
                ("Power Overload", "false"),
                ("Power Interlock", "inactive"),
                ("Main Power Fault", if node.bmc.psu_ok.iter().all(|p| *p) { "false" } else { "true" }),
                ("Power Control Fault", "false"),
                ("Power Restore Policy", "always-off"),
                ("Chassis Intrusion", "inactive"),
                ("Front-Panel Lockout", "inactive"),
                ("Drive Fault", "false"),
                ("Cooling/Fan Fault", if fan_fault { "true" } else { "false" }),
            ] {
                let _ = writeln!(out, "{k:<21}: {v}");
            }
            CommandResult::success(out)
        }
        ["power", action] => power(ctx, node, action),
        ["power"] => usage(METADATA.name, "chassis power: expected status|on|off|cycle|reset"),
        _ => usage(METADATA.name, "chassis: expected 'status' or 'power <action>'"),
    }
}

fn power(ctx: &mut ExecutionContext<'_>, node: &DgxNode, action: &str) -> CommandResult {
    let result = match action {
        "status" => {
            let on = if node.bmc.chassis_power_on { "on" } else { "off" };
            return CommandResult::success(format!("Chassis Power is {on}\n"));
        }
        "on" => ctx
            .store
            .set_chassis_power(&node.id, true)
            .map(|_| "Chassis Power Control: Up/On\n"),
        "off" => ctx
            .store
            .set_chassis_power(&node.id, false)
            .and_then(|_| {
                ctx.store.set_slurm_state(
                    &node.id,
                    SlurmState::Down,
                    Some("Not responding".to_string()),
                )
            })
            .map(|_| "Chassis Power Control: Down/Off\n"),
        "cycle" | "reset" => ctx.store.power_cycle_node(&node.id).map(|cleared| {
            info!(node = %node.id, cleared, "BMC power cycle");
            if action == "cycle" {
                "Chassis Power Control: Cycle\n"
            } else {
                "Chassis Power Control: Reset\n"
            }
        }),
        other => {
            return usage(
                METADATA.name,
                &format!("chassis power: invalid action '{other}'"),
            )
        }
    };
    match result {
        Ok(text) => CommandResult::success(text),
        Err(err) => store_failure(METADATA.name, &err),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SEL / MC
// ═══════════════════════════════════════════════════════════════════════════

fn sel(ctx: &mut ExecutionContext<'_>, node: &DgxNode, rest: &[&str]) -> CommandResult {
    match rest {
        [] | ["list"] | ["elist"] => {
            if node.bmc.sel.is_empty() {
                return CommandResult::success("SEL has no entries\n");
            }
            let mut out = String::new();
            for entry in &node.bmc.sel {
                let at = WallClock::at(Duration::from_secs_f64(entry.timestamp_secs));
                let _ = writeln!(
                    out,
                    "{:>4x} | {} | {} | {} | {} | {}",
                    entry.id,
                    at.us_date(),
                    at.time_of_day(),
                    entry.sensor,
                    entry.event,
                    if entry.asserted { "Asserted" } else { "Deasserted" }
                );
            }
            CommandResult::success(out)
        }
        ["info"] => CommandResult::success(format!(
            "SEL Information\nVersion          : 1.5 (v1.5, v2 compliant)\nEntries          : {}\nFree Space       : {} bytes\n",
            node.bmc.sel.len(),
            16_384usize.saturating_sub(node.bmc.sel.len() * 16)
        )),
        ["clear"] => match ctx.store.clear_sel(&node.id) {
            Ok(_) => CommandResult::success("Clearing SEL.  Please allow a few seconds to erase.\n"),
            Err(err) => store_failure(METADATA.name, &err),
        },
        _ => usage(METADATA.name, "sel: expected list, elist, info or clear"),
    }
}

fn mc(rest: &[&str]) -> CommandResult {
    match rest {
        ["info"] => CommandResult::success(
            "Device ID                 : 32\n\
             Device Revision           : 1\n\
             Firmware Revision         : 1.18\n\
             IPMI Version              : 2.0\n\
             Manufacturer ID           : 10876\n\
             Manufacturer Name         : NVIDIA\n\
             Product ID                : 4 (0x0004)\n\
             Product Name              : DGX A100 BMC\n\
             Device Available          : yes\n",
        ),
        _ => usage(METADATA.name, "mc: expected 'info'"),
    }
}
