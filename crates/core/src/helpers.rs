//! Helpers shared by simulators.

use crate::{CommandResult, SimulatorMetadata};
use gpulab_cluster::ClusterError;
use gpulab_parser::ParsedCommand;
use gpulab_suggest::{Suggestion, SuggestionKind};
use gpulab_types::GpuIndex;

/// How a flag name is written on the command line: `-x` for one character,
/// `--name` otherwise, unless the metadata lists a single-dash spelling.
pub fn display_flag(meta: &SimulatorMetadata, name: &str) -> String {
    let single = format!("-{name}");
    if name.chars().count() == 1 || meta.flags.contains(&single.as_str()) {
        single
    } else {
        format!("--{name}")
    }
}

/// Reject the first flag the simulator does not know.
///
/// Returns a usage-error result carrying "did you mean" text built against
/// the simulator's declared flags.
pub fn check_flags(meta: &SimulatorMetadata, cmd: &ParsedCommand) -> Result<(), CommandResult> {
    match cmd.flag_names().find(|name| !meta.knows_flag(name)) {
        None => Ok(()),
        Some(unknown) => {
            let typed = display_flag(meta, unknown);
            let suggestion = Suggestion::build(
                SuggestionKind::Flag {
                    command: cmd.base.clone(),
                },
                &typed,
                meta.flags.iter(),
            );
            Err(CommandResult::usage_error(suggestion.message()))
        }
    }
}

/// Reject an unknown subcommand with "did you mean" text.
pub fn check_subcommand(meta: &SimulatorMetadata, sub: &str) -> Result<(), CommandResult> {
    if meta.knows_subcommand(sub) {
        return Ok(());
    }
    let suggestion = Suggestion::build(
        SuggestionKind::Subcommand {
            command: meta.name.to_string(),
        },
        sub,
        meta.subcommands.iter(),
    );
    Err(CommandResult::usage_error(suggestion.message()))
}

/// Parse a GPU selector such as `0`, `0,3`, or `1-4`.
///
/// Returns `None` on any malformed element.
pub fn parse_index_list(raw: &str) -> Option<Vec<GpuIndex>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.trim().parse().ok()?;
            let hi: u32 = hi.trim().parse().ok()?;
            if lo > hi {
                return None;
            }
            out.extend((lo..=hi).map(GpuIndex));
        } else {
            out.push(GpuIndex(part.parse().ok()?));
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Turn a store error into a failed command result prefixed with the tool name.
pub fn store_failure(tool: &str, err: &ClusterError) -> CommandResult {
    CommandResult::failure(format!("{tool}: {err}\n"))
}

/// Usage error with a `--help` pointer.
pub fn usage(tool: &str, message: &str) -> CommandResult {
    CommandResult::usage_error(format!(
        "{tool}: {message}\nTry '{tool} --help' for more information.\n"
    ))
}

/// Render a `--help` screen from metadata.
pub fn help_text(meta: &SimulatorMetadata) -> String {
    let mut out = format!("{} {} - {}\n", meta.name, meta.version, meta.description);
    if !meta.subcommands.is_empty() {
        out.push_str("\nSubcommands:\n");
        for sub in meta.subcommands {
            out.push_str(&format!("    {sub}\n"));
        }
    }
    if !meta.flags.is_empty() {
        out.push_str("\nOptions:\n");
        for flag in meta.flags {
            out.push_str(&format!("    {flag}\n"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_parser::{parse, parse_with, FlagSpec};

    static META: SimulatorMetadata = SimulatorMetadata {
        name: "tool",
        version: "1.0",
        description: "test tool",
        aliases: &[],
        subcommands: &["show", "update"],
        flags: &["-q", "-i", "--query-gpu", "-pl", "--help"],
    };

    #[test]
    fn test_display_flag() {
        assert_eq!(display_flag(&META, "q"), "-q");
        assert_eq!(display_flag(&META, "pl"), "-pl");
        assert_eq!(display_flag(&META, "query-gpu"), "--query-gpu");
        assert_eq!(display_flag(&META, "bogus"), "--bogus");
    }

    #[test]
    fn test_check_flags_accepts_known() {
        let spec = FlagSpec::new().with_values(["pl"]);
        let cmd = parse_with("tool -q --query-gpu=name -pl 300", &spec);
        assert!(check_flags(&META, &cmd).is_ok());
    }

    #[test]
    fn test_check_flags_suggests() {
        let cmd = parse("tool --query-gp=name");
        let err = check_flags(&META, &cmd).unwrap_err();
        assert_eq!(err.exit_code, 2);
        assert!(err.output.contains("unrecognized option '--query-gp'"));
        assert!(err.output.contains("--query-gpu"));
    }

    #[test]
    fn test_check_subcommand() {
        assert!(check_subcommand(&META, "show").is_ok());
        let err = check_subcommand(&META, "shwo").unwrap_err();
        assert_eq!(err.exit_code, 2);
        assert!(err.output.contains("Did you mean 'show'?"));
    }

    #[test]
    fn test_parse_index_list() {
        assert_eq!(parse_index_list("0"), Some(vec![GpuIndex(0)]));
        assert_eq!(
            parse_index_list("0,2-3"),
            Some(vec![GpuIndex(0), GpuIndex(2), GpuIndex(3)])
        );
        assert_eq!(parse_index_list("x"), None);
        assert_eq!(parse_index_list("3-1"), None);
        assert_eq!(parse_index_list(""), None);
    }
}
