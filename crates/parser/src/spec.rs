//! Per-command flag declarations.

use std::collections::BTreeSet;

/// Flag declarations for one command.
///
/// Without declarations the parser follows its default rule: a flag consumes
/// the next token unless that token looks like another flag, and a multi-char
/// short token is a bundle of boolean flags. Declarations refine this:
///
/// - a **value flag** always binds a value. Multi-character names (`pl`, `pm`)
///   make `-pl 300` a single flag rather than a `p`,`l` bundle, and a bundle
///   led by a single-character value flag binds the remainder (`-i0` → `i=0`).
/// - a **switch** never consumes the following token (`grep -i xid` keeps
///   `xid` positional).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSpec {
    value_flags: BTreeSet<String>,
    switches: BTreeSet<String>,
}

impl FlagSpec {
    /// Empty spec (default parsing rule only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare value-taking flags.
    pub fn with_values<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.value_flags.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare switches.
    pub fn with_switches<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.switches.extend(names.into_iter().map(Into::into));
        self
    }

    /// Whether `name` is declared as taking a value.
    pub fn takes_value(&self, name: &str) -> bool {
        self.value_flags.contains(name)
    }

    /// Whether `name` is declared as a switch.
    pub fn is_switch(&self, name: &str) -> bool {
        self.switches.contains(name)
    }

    /// Every declared flag name.
    pub fn declared(&self) -> impl Iterator<Item = &str> + '_ {
        self.value_flags
            .iter()
            .chain(self.switches.iter())
            .map(String::as_str)
    }
}
