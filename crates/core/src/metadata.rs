//! Static simulator descriptions.

/// What a simulator is and what it accepts.
///
/// Flags are listed with their dashes (`-q`, `--query-gpu`) because they are
/// shown to the learner as suggestion candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatorMetadata {
    /// Primary command name.
    pub name: &'static str,

    /// Version string printed by `--version`-style flags.
    pub version: &'static str,

    /// One-line description shown by `help`.
    pub description: &'static str,

    /// Other command names that dispatch to this simulator.
    pub aliases: &'static [&'static str],

    /// Recognized subcommands. Empty means the tool takes none.
    pub subcommands: &'static [&'static str],

    /// Recognized flags, with dashes.
    pub flags: &'static [&'static str],
}

impl SimulatorMetadata {
    /// Every name this simulator answers to.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }

    /// Whether a flag (without dashes) is recognized in either spelling.
    pub fn knows_flag(&self, name: &str) -> bool {
        self.flags
            .iter()
            .any(|f| f.trim_start_matches('-') == name)
    }

    /// Whether a subcommand is recognized.
    pub fn knows_subcommand(&self, name: &str) -> bool {
        self.subcommands.contains(&name)
    }
}
