//! The parsed form of one command line.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value bound to a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagValue {
    /// Flag given without a value (`-q`, `--help`).
    Present,
    /// Flag given with a value (`-i 0`, `--format=csv`).
    Value(String),
}

impl FlagValue {
    /// The bound value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Present => None,
            FlagValue::Value(v) => Some(v),
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Present => f.write_str("true"),
            FlagValue::Value(v) => f.write_str(v),
        }
    }
}

/// Result of parsing one input line.
///
/// Produced only by the parser; parsing the same line twice yields equal
/// values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// The line exactly as typed.
    pub raw: String,

    /// First token of the first pipeline stage. Empty only for blank input.
    pub base: String,

    /// Positional arguments in order.
    pub args: Vec<String>,

    /// Flags keyed by name without leading dashes, in first-seen order.
    pub flags: IndexMap<String, FlagValue>,

    /// Every pipeline stage (first included) when the line contains an
    /// unquoted `|`; empty otherwise.
    pub pipeline: Vec<String>,
}

impl ParsedCommand {
    /// Blank-line parse.
    pub fn empty(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Default::default()
        }
    }

    /// Whether this is a blank-line parse.
    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// Whether the line was a pipeline.
    pub fn is_pipeline(&self) -> bool {
        !self.pipeline.is_empty()
    }

    /// First positional argument, conventionally the subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Whether a flag was given.
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.contains_key(name)
    }

    /// Whether any of the given flag spellings was given.
    pub fn has_any_flag(&self, names: &[&str]) -> bool {
        names.iter().any(|n| self.has_flag(n))
    }

    /// Raw flag entry.
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    /// Value bound to a flag, if the flag was given with one.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.flags.get(name).and_then(FlagValue::as_str)
    }

    /// Value of the first spelling present among `names`.
    pub fn flag_value_any(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.flag_value(n))
    }

    /// Flag names in first-seen order.
    pub fn flag_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.flags.keys().map(String::as_str)
    }
}
