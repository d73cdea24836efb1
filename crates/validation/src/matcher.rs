//! Command equivalence for command-executed rules.
//!
//! Learners rarely type a command exactly the way a scenario author wrote it.
//! Under [`MatchPolicy::Lenient`] an executed command matches an expected
//! template when, after whitespace normalization, any of these hold:
//!
//! - the two strings are equal
//! - same base command, same positional arguments (trailing plural `s`
//!   ignored, `key=value` arguments compared without case or order), and every
//!   expected flag present with the expected value where one is given
//! - when the template is a pipeline, the executed pipeline has the same base
//!   command in every stage
//!
//! One exception applies under both policies: an expected GPU reset counts
//! as matched by any reset attempt whose output shows the XID 79 refusal.
//! Trying the right corrective action is the objective even though the
//! hardware refuses it.

use gpulab_parser::ParsedCommand;
use gpulab_types::FALLEN_OFF_BUS_MARKER;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How strictly an executed command must resemble the template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Equivalent forms accepted.
    #[default]
    Lenient,
    /// Whitespace-normalized literal equality only.
    Strict,
}

/// Why a template matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Equivalent,
    RefusedReset,
}

/// Matches executed commands against templates under a policy.
///
/// `parse` turns a line into a [`ParsedCommand`]. Callers with per-command
/// flag declarations pass a parser that honors them so `-i0` and `-i 0`
/// compare equal.
pub struct CommandMatcher<'a> {
    policy: MatchPolicy,
    parse: &'a dyn Fn(&str) -> ParsedCommand,
}

impl<'a> CommandMatcher<'a> {
    pub fn new(policy: MatchPolicy, parse: &'a dyn Fn(&str) -> ParsedCommand) -> Self {
        Self { policy, parse }
    }

    /// First way `executed` (which produced `output`) satisfies `expected`.
    pub fn matches(&self, expected: &str, executed: &str, output: &str) -> Option<MatchKind> {
        if normalize_whitespace(expected) == normalize_whitespace(executed) {
            return Some(MatchKind::Exact);
        }

        let want = (self.parse)(expected);
        let got = (self.parse)(executed);
        if is_gpu_reset(&want) && is_gpu_reset(&got) && output.contains(FALLEN_OFF_BUS_MARKER) {
            return Some(MatchKind::RefusedReset);
        }

        match self.policy {
            MatchPolicy::Strict => None,
            MatchPolicy::Lenient => equivalent(&want, &got).then_some(MatchKind::Equivalent),
        }
    }

    /// First template in `expected` that matches, with the way it matched.
    pub fn matches_any<'t>(
        &self,
        expected: &'t [String],
        executed: &str,
        output: &str,
    ) -> Option<(&'t str, MatchKind)> {
        expected.iter().find_map(|template| {
            self.matches(template, executed, output)
                .map(|kind| (template.as_str(), kind))
        })
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_gpu_reset(cmd: &ParsedCommand) -> bool {
    cmd.base == "nvidia-smi" && cmd.has_any_flag(&["r", "gpu-reset"])
}

fn equivalent(want: &ParsedCommand, got: &ParsedCommand) -> bool {
    if want.base != got.base {
        return false;
    }

    if want.is_pipeline() {
        let stage_bases = |cmd: &ParsedCommand| -> Vec<Option<String>> {
            cmd.pipeline
                .iter()
                .map(|stage| stage.split_whitespace().next().map(str::to_string))
                .collect()
        };
        if stage_bases(want) != stage_bases(got) {
            return false;
        }
    }

    let (want_pos, want_kv) = split_args(&want.args);
    let (got_pos, got_kv) = split_args(&got.args);
    if want_pos != got_pos {
        return false;
    }
    if want_kv
        .iter()
        .any(|(k, v)| got_kv.get(k).map_or(true, |g| !g.eq_ignore_ascii_case(v)))
    {
        return false;
    }

    want.flags.iter().all(|(name, value)| match got.flag(name) {
        None => false,
        Some(got_value) => match value.as_str() {
            None => true,
            Some(v) => got_value.as_str() == Some(v),
        },
    })
}

/// Positional arguments with plurals folded, plus `key=value` pairs keyed by
/// lowercase key.
fn split_args(args: &[String]) -> (Vec<String>, BTreeMap<String, String>) {
    let mut positional = Vec::new();
    let mut pairs = BTreeMap::new();
    for arg in args {
        match arg.split_once('=') {
            Some((k, v)) if !k.is_empty() => {
                pairs.insert(k.to_ascii_lowercase(), v.to_string());
            }
            _ => positional.push(singular(arg)),
        }
    }
    (positional, pairs)
}

/// `nodes` → `node`, `partitions` → `partition`. Words ending in `ss` or
/// `us` are left alone.
fn singular(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") && !lower.ends_with("us")
    {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_parser::parse;

    fn lenient() -> CommandMatcher<'static> {
        CommandMatcher::new(MatchPolicy::Lenient, &parse)
    }

    fn strict() -> CommandMatcher<'static> {
        CommandMatcher::new(MatchPolicy::Strict, &parse)
    }

    #[test]
    fn test_whitespace_is_not_significant() {
        assert_eq!(
            strict().matches("sinfo  -R", " sinfo -R ", ""),
            Some(MatchKind::Exact)
        );
    }

    #[test]
    fn test_plural_targets_equivalent() {
        let m = lenient();
        assert!(m.matches("scontrol show node", "scontrol show nodes", "").is_some());
        assert!(m.matches("scontrol show nodes", "scontrol show node", "").is_some());
        assert!(strict().matches("scontrol show node", "scontrol show nodes", "").is_none());
    }

    #[test]
    fn test_flag_order_and_superset() {
        let m = lenient();
        assert!(m.matches("nvidia-smi -q -d ECC", "nvidia-smi -d ECC -q", "").is_some());
        assert!(m.matches("nvidia-smi -q", "nvidia-smi -q -i 0", "").is_some());
        assert!(m.matches("nvidia-smi -q -d ECC", "nvidia-smi -q -d MEMORY", "").is_none());
        assert!(m.matches("nvidia-smi -q -i 0", "nvidia-smi -q", "").is_none());
        assert!(m.matches("sinfo -R", "sinfo -Rl", "").is_some());
    }

    #[test]
    fn test_key_value_args() {
        let m = lenient();
        assert!(m
            .matches(
                "scontrol update nodename=dgx-01 state=resume",
                "scontrol update State=RESUME NodeName=dgx-01",
                ""
            )
            .is_some());
        assert!(m
            .matches(
                "scontrol update nodename=dgx-01 state=resume",
                "scontrol update nodename=dgx-02 state=resume",
                ""
            )
            .is_none());
    }

    #[test]
    fn test_pipeline_stage_bases() {
        let m = lenient();
        assert!(m
            .matches("nvidia-smi -q | grep ECC", "nvidia-smi -q | grep -i ecc", "")
            .is_some());
        assert!(m
            .matches("nvidia-smi -q | grep ECC", "nvidia-smi -q | head", "")
            .is_none());
        // A pipeline still satisfies a plain template.
        assert!(m.matches("dmesg", "dmesg | grep -i xid", "").is_some());
    }

    #[test]
    fn test_refused_reset_counts() {
        let output = "Unable to reset GPU 00000000:07:00.0: GPU has fallen off the bus (XID 79).\n";
        for m in [lenient(), strict()] {
            assert_eq!(
                m.matches("nvidia-smi -r -i 0", "nvidia-smi --gpu-reset -i 0", output),
                Some(MatchKind::RefusedReset)
            );
            assert!(m.matches("nvidia-smi -r -i 0", "dmesg", output).is_none());
        }
    }

    #[test]
    fn test_matches_any_reports_template() {
        let templates = vec!["sinfo".to_string(), "sinfo -R".to_string()];
        let found = lenient().matches_any(&templates, "sinfo -R", "");
        assert_eq!(found, Some(("sinfo", MatchKind::Equivalent)));
    }
}
