//! Text filters for the stages after the first in a pipeline.
//!
//! Each filter takes the previous stage's output as its input. The pipeline
//! result carries the exit code of the last stage, so `grep` with no match
//! makes the whole line exit 1 the way a shell would.

use gpulab_core::{usage, CommandResult, EXIT_NOT_FOUND};
use gpulab_parser::{parse_with, FlagSpec, ParsedCommand};
use gpulab_suggest::{Suggestion, SuggestionKind};
use regex::RegexBuilder;
use std::fmt::Write as _;
use tracing::debug;

/// Commands accepted after a `|`.
pub const FILTER_NAMES: [&str; 5] = ["grep", "head", "tail", "wc", "sort"];

/// Lines kept by `head`/`tail` when no count is given.
const DEFAULT_LINES: usize = 10;

/// Run one pipeline stage over `input`.
pub fn apply_filter(stage: &str, input: &str) -> CommandResult {
    let cmd = parse_with(stage, &filter_spec());
    debug!(filter = %cmd.base, input_lines = input.lines().count(), "Applying filter");
    match cmd.base.as_str() {
        "grep" | "egrep" => grep(&cmd, input),
        "head" => head_tail(&cmd, input, false),
        "tail" => head_tail(&cmd, input, true),
        "wc" => wc(&cmd, input),
        "sort" => sort(&cmd, input),
        "" => usage("bash", "syntax error near unexpected token `|'"),
        other => {
            let suggestion = Suggestion::build(SuggestionKind::Command, other, FILTER_NAMES);
            CommandResult::with_code(suggestion.message(), EXIT_NOT_FOUND)
        }
    }
}

/// Run the filter stages of `cmd` over the first stage's result.
///
/// A failing first stage is returned unfiltered, and the last stage's exit
/// code wins. An unknown filter stops the pipeline with exit 127.
pub fn apply_pipeline(cmd: &ParsedCommand, first: CommandResult) -> CommandResult {
    if !cmd.is_pipeline() || !first.is_success() {
        return first;
    }
    let (output, exit_code) = cmd.pipeline.iter().skip(1).fold(
        (first.output.clone(), first.exit_code),
        |(text, code), stage| {
            if code == EXIT_NOT_FOUND {
                return (text, code);
            }
            let out = apply_filter(stage, &text);
            (out.output, out.exit_code)
        },
    );
    CommandResult {
        output,
        exit_code,
        ..first
    }
}

fn filter_spec() -> FlagSpec {
    FlagSpec::new()
        .with_values(["n", "lines", "e", "regexp", "k"])
        .with_switches([
            "i",
            "ignore-case",
            "v",
            "invert-match",
            "c",
            "count",
            "E",
            "extended-regexp",
            "l",
            "w",
            "r",
            "reverse",
            "u",
            "unique",
        ])
}

// ═══════════════════════════════════════════════════════════════════════════
// grep
// ═══════════════════════════════════════════════════════════════════════════

fn grep(cmd: &ParsedCommand, input: &str) -> CommandResult {
    let mut args = cmd.args.iter();
    let pattern = match cmd.flag_value_any(&["e", "regexp"]) {
        Some(p) => p.to_string(),
        None => match args.next() {
            Some(p) => p.clone(),
            None => {
                return usage("grep", "missing pattern\nUsage: grep [OPTION]... PATTERNS")
            }
        },
    };
    let extended = cmd.base == "egrep" || cmd.has_any_flag(&["E", "extended-regexp"]);
    let mut source = if extended {
        pattern.clone()
    } else {
        basic_to_extended(&pattern)
    };
    if cmd.has_flag("w") {
        source = format!(r"\b(?:{source})\b");
    }
    let regex = match RegexBuilder::new(&source)
        .case_insensitive(cmd.has_any_flag(&["i", "ignore-case"]))
        .build()
    {
        Ok(re) => re,
        Err(err) => {
            debug!(%pattern, %err, "Rejected grep pattern");
            return CommandResult::usage_error(format!("grep: Invalid regular expression '{pattern}'\n"));
        }
    };

    let invert = cmd.has_any_flag(&["v", "invert-match"]);
    let kept: Vec<&str> = input
        .lines()
        .filter(|line| regex.is_match(line) != invert)
        .collect();
    let code = if kept.is_empty() { 1 } else { 0 };

    let out = if cmd.has_any_flag(&["c", "count"]) {
        format!("{}\n", kept.len())
    } else {
        join_lines(kept)
    };
    CommandResult::with_code(out, code)
}

/// Rewrite a basic regular expression into the syntax `regex` understands.
///
/// In a BRE `+ ? | ( ) { }` are literal and their backslashed forms are
/// operators; everything else passes through.
fn basic_to_extended(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(op @ ('+' | '?' | '|' | '(' | ')' | '{' | '}')) => out.push(op),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push_str("\\\\"),
            },
            '+' | '?' | '|' | '(' | ')' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// head / tail / wc / sort
// ═══════════════════════════════════════════════════════════════════════════

fn head_tail(cmd: &ParsedCommand, input: &str, from_end: bool) -> CommandResult {
    let tool = if from_end { "tail" } else { "head" };
    // `head -5` reaches us as a positional "-5".
    let raw = cmd
        .flag_value_any(&["n", "lines"])
        .or_else(|| cmd.args.first().map(|a| a.trim_start_matches('-')));
    let count = match raw {
        None if cmd.has_any_flag(&["n", "lines"]) => {
            return usage(tool, "option requires an argument -- 'n'")
        }
        None => DEFAULT_LINES,
        Some(raw) => match raw.trim_start_matches('+').parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                return CommandResult::failure(format!(
                    "{tool}: invalid number of lines: '{raw}'\n"
                ))
            }
        },
    };

    let lines: Vec<&str> = input.lines().collect();
    let kept = if from_end {
        &lines[lines.len().saturating_sub(count)..]
    } else {
        &lines[..count.min(lines.len())]
    };
    CommandResult::success(join_lines(kept.iter().copied()))
}

fn wc(cmd: &ParsedCommand, input: &str) -> CommandResult {
    let lines = input.matches('\n').count();
    if cmd.has_flag("l") {
        return CommandResult::success(format!("{lines}\n"));
    }
    if cmd.has_flag("w") {
        return CommandResult::success(format!("{}\n", input.split_whitespace().count()));
    }
    if cmd.has_flag("c") {
        return CommandResult::success(format!("{}\n", input.len()));
    }
    CommandResult::success(format!(
        "{lines:>7} {:>7} {:>7}\n",
        input.split_whitespace().count(),
        input.len()
    ))
}

fn sort(cmd: &ParsedCommand, input: &str) -> CommandResult {
    let mut lines: Vec<&str> = input.lines().collect();
    if cmd.has_flag("n") {
        lines.sort_by(|a, b| leading_number(a).total_cmp(&leading_number(b)).then(a.cmp(b)));
    } else {
        lines.sort_unstable();
    }
    if cmd.has_any_flag(&["u", "unique"]) {
        lines.dedup();
    }
    if cmd.has_any_flag(&["r", "reverse"]) {
        lines.reverse();
    }
    CommandResult::success(join_lines(lines))
}

/// Numeric sort key: the number a line starts with, 0 when there is none.
fn leading_number(line: &str) -> f64 {
    let trimmed = line.trim_start();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && c == '-')))
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().unwrap_or(0.0)
}

fn join_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "GPU 0: NVIDIA A100\nGPU 1: NVIDIA A100\nXid 79 on GPU 1\nfan ok\n";

    #[test]
    fn test_grep_basic() {
        let out = apply_filter("grep GPU", TEXT);
        assert_eq!(out.output.lines().count(), 3);
        assert!(out.is_success());

        let out = apply_filter("grep -i xid", TEXT);
        assert_eq!(out.output, "Xid 79 on GPU 1\n");

        let out = apply_filter("grep -c A100", TEXT);
        assert_eq!(out.output, "2\n");

        let out = apply_filter("grep -v GPU", TEXT);
        assert_eq!(out.output, "fan ok\n");
    }

    #[test]
    fn test_grep_no_match_exits_one() {
        let out = apply_filter("grep nothing", TEXT);
        assert_eq!(out.exit_code, 1);
        assert!(out.output.is_empty());
    }

    #[test]
    fn test_grep_basic_vs_extended_alternation() {
        let out = apply_filter("grep \"fan|Xid\"", TEXT);
        assert_eq!(out.exit_code, 1);

        let out = apply_filter("grep -E \"fan|Xid\"", TEXT);
        assert_eq!(out.output.lines().count(), 2);

        let out = apply_filter("grep 'fan\\|Xid'", TEXT);
        assert_eq!(out.output.lines().count(), 2);
    }

    #[test]
    fn test_grep_bad_pattern() {
        let out = apply_filter("grep -E \"(\"", TEXT);
        assert_eq!(out.exit_code, 2);
    }

    #[test]
    fn test_head_tail() {
        assert_eq!(apply_filter("head -n 1", TEXT).output, "GPU 0: NVIDIA A100\n");
        assert_eq!(apply_filter("head -2", TEXT).output.lines().count(), 2);
        assert_eq!(apply_filter("tail -n1", TEXT).output, "fan ok\n");
        assert_eq!(apply_filter("tail -n 50", TEXT).output, TEXT);
        assert_eq!(apply_filter("head -n abc", TEXT).exit_code, 1);
    }

    #[test]
    fn test_wc_and_sort() {
        assert_eq!(apply_filter("wc -l", TEXT).output, "4\n");
        assert_eq!(apply_filter("sort -n", "10 b\n9 a\n10 a\n").output, "9 a\n10 a\n10 b\n");
        assert_eq!(apply_filter("sort -r -u", "b\na\nb\n").output, "b\na\n");
    }

    #[test]
    fn test_unknown_filter_suggests() {
        let out = apply_filter("gerp GPU", TEXT);
        assert_eq!(out.exit_code, 127);
        assert!(out.output.contains("gerp: command not found"));
        assert!(out.output.contains("grep"));
    }
}
