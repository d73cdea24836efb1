//! "Did you mean" feedback for unrecognized commands, flags, and subcommands.
//!
//! Two layers:
//!
//! - [`distance`]: Levenshtein edit distance
//! - [`Suggestion`]: ranks a candidate set against an unknown token with an
//!   adaptive threshold and renders terminal text
//!
//! The candidate sets come from the caller (usually simulator metadata), so
//! this crate knows nothing about specific tools.

mod distance;
mod suggestion;

pub use distance::distance;
pub use suggestion::{
    adaptive_threshold, confidence, find_similar_strings, rank_candidates, ScoredCandidate,
    Suggestion, SuggestionKind, DEFAULT_MAX_DISTANCE, MAX_SUGGESTIONS,
};
