//! Shell-like command line parser.
//!
//! Turns one raw input line into a [`ParsedCommand`]:
//!
//! - **Pipelines**: the line is split on unquoted `|` first
//! - **Tokens**: each stage is split on whitespace, honoring quotes
//! - **Flags**: `--long`, `--long=value`, `-s value`, bundled `-abc`
//! - **Positionals**: everything else, order preserved
//!
//! Parsing is pure and total. Malformed input degrades to a best-effort parse;
//! there is no error type.

mod command;
mod parser;
mod spec;
mod tokenizer;

pub use command::{FlagValue, ParsedCommand};
pub use parser::{looks_like_flag, parse, parse_with, peek_base};
pub use spec::FlagSpec;
pub use tokenizer::{split_pipeline, tokenize};
