//! Nearest-candidate search and "did you mean" feedback.

use crate::distance::distance;
use std::fmt::Write as _;
use tracing::debug;

/// Default upper bound on edit distance for a suggestion.
pub const DEFAULT_MAX_DISTANCE: usize = 3;

/// At most this many suggestions are returned.
pub const MAX_SUGGESTIONS: usize = 3;

/// Edit-distance threshold for an input of `input_len` characters.
///
/// `min(requested_max, max(2, input_len / 2))`: short inputs tolerate fewer
/// edits so a two-letter typo does not match half the catalog.
pub fn adaptive_threshold(input_len: usize, requested_max: usize) -> usize {
    requested_max.min(2.max(input_len / 2))
}

/// A candidate with its distance from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub candidate: String,
    pub distance: usize,
}

/// Rank candidates by distance from `input`.
///
/// Exact matches (distance 0) and candidates beyond the adaptive threshold
/// are dropped. The result is sorted ascending by distance, ties keeping
/// candidate order, and truncated to [`MAX_SUGGESTIONS`].
pub fn rank_candidates<I, S>(input: &str, candidates: I, max_distance: usize) -> Vec<ScoredCandidate>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let threshold = adaptive_threshold(input.chars().count(), max_distance);
    let mut scored: Vec<ScoredCandidate> = Vec::new();

    for candidate in candidates {
        let candidate = candidate.as_ref();
        if scored.iter().any(|s| s.candidate == candidate) {
            continue;
        }
        let d = distance(input, candidate);
        if d > 0 && d <= threshold {
            scored.push(ScoredCandidate {
                candidate: candidate.to_string(),
                distance: d,
            });
        }
    }

    scored.sort_by_key(|s| s.distance);
    scored.truncate(MAX_SUGGESTIONS);
    scored
}

/// Names of the closest candidates to `input`, best first.
pub fn find_similar_strings<I, S>(input: &str, candidates: I, max_distance: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rank_candidates(input, candidates, max_distance)
        .into_iter()
        .map(|s| s.candidate)
        .collect()
}

/// Confidence in the best candidate: `1 - distance / max(input_len, candidate_len)`.
pub fn confidence(input: &str, best: &ScoredCandidate) -> f64 {
    let longest = input
        .chars()
        .count()
        .max(best.candidate.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - best.distance as f64 / longest as f64
}

/// What kind of token was not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionKind {
    /// Unknown base command.
    Command,
    /// Unknown flag of a known command.
    Flag { command: String },
    /// Unknown subcommand of a known command.
    Subcommand { command: String },
}

/// Feedback for one unrecognized token.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub input: String,
    pub candidates: Vec<ScoredCandidate>,

    /// Confidence in the first candidate, 0.0 when there is none.
    pub confidence: f64,
}

impl Suggestion {
    /// Build a suggestion for `input` against `candidates`.
    pub fn build<I, S>(kind: SuggestionKind, input: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranked = rank_candidates(input, candidates, DEFAULT_MAX_DISTANCE);
        let confidence = ranked.first().map(|b| confidence(input, b)).unwrap_or(0.0);
        debug!(
            input,
            matches = ranked.len(),
            confidence,
            "Built suggestion"
        );
        Self {
            kind,
            input: input.to_string(),
            candidates: ranked,
            confidence,
        }
    }

    /// Best candidate, if any.
    pub fn best(&self) -> Option<&str> {
        self.candidates.first().map(|c| c.candidate.as_str())
    }

    /// Whether any candidate was found.
    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Terminal-ready message, ending with a newline.
    pub fn message(&self) -> String {
        let mut out = match &self.kind {
            SuggestionKind::Command => format!("{}: command not found\n", self.input),
            SuggestionKind::Flag { command } => {
                format!("{command}: unrecognized option '{}'\n", self.input)
            }
            SuggestionKind::Subcommand { command } => {
                format!("{command}: invalid command '{}'\n", self.input)
            }
        };

        match self.candidates.as_slice() {
            [] => {
                if let SuggestionKind::Flag { command } | SuggestionKind::Subcommand { command } =
                    &self.kind
                {
                    let _ = writeln!(out, "Try '{command} --help' for more information.");
                }
            }
            [only] => {
                let _ = writeln!(out, "Did you mean '{}'?", only.candidate);
            }
            many => {
                let _ = writeln!(out, "Did you mean one of these?");
                for c in many {
                    let _ = writeln!(out, "    {}", c.candidate);
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinfo_suggested_first() {
        let found = find_similar_strings("sinf", ["sinfo", "squeue", "dcgmi"], DEFAULT_MAX_DISTANCE);
        assert_eq!(found.first().map(String::as_str), Some("sinfo"));
    }

    #[test]
    fn test_exact_matches_excluded() {
        let found = find_similar_strings("sinfo", ["sinfo", "sinf", "sinfoo"], DEFAULT_MAX_DISTANCE);
        assert!(!found.contains(&"sinfo".to_string()));
        assert_eq!(found, vec!["sinf", "sinfoo"]);
    }

    #[test]
    fn test_capped_and_sorted() {
        let candidates = ["abcdx", "abcd", "abcxy", "abxyz", "abcdef"];
        let ranked = rank_candidates("abcde", candidates, DEFAULT_MAX_DISTANCE);
        assert!(ranked.len() <= MAX_SUGGESTIONS);
        assert!(ranked.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert_eq!(ranked[0].distance, 1);
    }

    #[test]
    fn test_adaptive_threshold() {
        assert_eq!(adaptive_threshold(1, 3), 2);
        assert_eq!(adaptive_threshold(4, 3), 2);
        assert_eq!(adaptive_threshold(6, 3), 3);
        assert_eq!(adaptive_threshold(20, 3), 3);
        assert_eq!(adaptive_threshold(20, 1), 1);
    }

    #[test]
    fn test_short_inputs_do_not_match_wildly() {
        // "ls" → "dcgmi" needs 5 edits, far above the threshold of 2.
        assert!(find_similar_strings("ls", ["dcgmi", "sinfo"], DEFAULT_MAX_DISTANCE).is_empty());
    }

    #[test]
    fn test_confidence() {
        let best = ScoredCandidate {
            candidate: "nvidia-smi".to_string(),
            distance: 1,
        };
        let c = confidence("nvidia-sm", &best);
        assert!((c - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_messages() {
        let s = Suggestion::build(SuggestionKind::Command, "nvidia-sm", ["nvidia-smi", "dcgmi"]);
        assert_eq!(s.best(), Some("nvidia-smi"));
        assert!(s.message().contains("command not found"));
        assert!(s.message().contains("Did you mean 'nvidia-smi'?"));

        let s = Suggestion::build(
            SuggestionKind::Flag {
                command: "nvidia-smi".to_string(),
            },
            "--bogus-flag-name",
            ["-q", "-L"],
        );
        assert!(!s.has_candidates());
        assert_eq!(s.confidence, 0.0);
        assert!(s.message().contains("Try 'nvidia-smi --help'"));
    }
}
