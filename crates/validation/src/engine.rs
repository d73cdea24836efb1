//! Step evaluation state machine.
//!
//! ```text
//!            evaluate()                 evaluate()
//! Pending ──────────────▶ Failed ◀──────────────┐
//!    │                      │                   │
//!    │ all rules pass       │ retry             │
//!    │ (or score ≥ min)     ▼                   │
//!    └─────────────────▶ Passed         (rules still failing)
//! ```
//!
//! `Failed` is not terminal: every later command re-triggers evaluation.
//! `Passed` is terminal for the step.

use crate::matcher::{CommandMatcher, MatchKind, MatchPolicy};
use crate::predicate::evaluate_state_check;
use crate::rule::{RuleKind, ValidationResult, ValidationRule};
use gpulab_cluster::ClusterStore;
use gpulab_parser::{parse, ParsedCommand};
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Validation behavior shared by every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// How executed commands are compared with templates.
    pub match_policy: MatchPolicy,

    /// Once a command-executed or output-match rule passes within a step it
    /// stays passed for that step.
    pub latch_event_rules: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::Lenient,
            latch_event_rules: true,
        }
    }
}

impl ValidationConfig {
    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_latching(mut self, latch: bool) -> Self {
        self.latch_event_rules = latch;
        self
    }
}

/// What one command left behind for the validator to look at.
pub struct EvaluationInput<'a> {
    /// Raw command line.
    pub command: &'a str,
    /// Text the command produced.
    pub output: &'a str,
    /// Simulated duration the command took; `None` when not timed.
    pub elapsed: Option<Duration>,
    /// Simulation time of the evaluation.
    pub now: Duration,
    /// Parser applied to templates and the executed command.
    pub parser: &'a dyn Fn(&str) -> ParsedCommand,
}

impl<'a> EvaluationInput<'a> {
    /// Input with no timing, evaluated at time zero, using the default parse
    /// rule.
    pub fn new(command: &'a str, output: &'a str) -> Self {
        Self {
            command,
            output,
            elapsed: None,
            now: Duration::ZERO,
            parser: &parse,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn at(mut self, now: Duration) -> Self {
        self.now = now;
        self
    }

    pub fn with_parser(mut self, parser: &'a dyn Fn(&str) -> ParsedCommand) -> Self {
        self.parser = parser;
        self
    }
}

/// Evaluate one rule with no step context.
pub fn evaluate_rule(
    rule: &ValidationRule,
    input: &EvaluationInput<'_>,
    store: &ClusterStore,
    policy: MatchPolicy,
) -> ValidationResult {
    let now = input.now;
    match &rule.kind {
        RuleKind::CommandExecuted { commands } => {
            let matcher = CommandMatcher::new(policy, input.parser);
            match matcher.matches_any(commands, input.command, input.output) {
                Some((_, MatchKind::RefusedReset)) => ValidationResult::pass(
                    rule,
                    "Reset attempted; the GPU has fallen off the bus and needs a node-level recovery",
                    now,
                ),
                Some((template, _)) => {
                    ValidationResult::pass(rule, format!("Ran '{template}'"), now)
                }
                None => ValidationResult::fail(
                    rule,
                    format!("Expected one of: {}", commands.join(", ")),
                    now,
                ),
            }
        }
        RuleKind::OutputMatch { pattern } => {
            match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) if re.is_match(input.output) => {
                    ValidationResult::pass(rule, format!("Output matched /{pattern}/"), now)
                }
                Ok(_) => ValidationResult::fail(
                    rule,
                    format!("Output did not match /{pattern}/"),
                    now,
                ),
                Err(err) => {
                    warn!(rule = %rule.id, %pattern, %err, "Invalid output pattern");
                    ValidationResult::fail(rule, format!("Invalid pattern /{pattern}/"), now)
                }
            }
        }
        RuleKind::StateCheck(check) => {
            let (passed, message) = evaluate_state_check(check, store);
            if passed {
                ValidationResult::pass(rule, message, now)
            } else {
                ValidationResult::fail(rule, message, now)
            }
        }
        RuleKind::TimeLimit { max_secs } => match input.elapsed {
            None => ValidationResult::pass(rule, "No timing recorded", now),
            Some(elapsed) if elapsed.as_secs_f64() <= *max_secs => ValidationResult::pass(
                rule,
                format!("Finished in {:.1}s (limit {max_secs:.1}s)", elapsed.as_secs_f64()),
                now,
            ),
            Some(elapsed) => ValidationResult::fail(
                rule,
                format!("Took {:.1}s (limit {max_secs:.1}s)", elapsed.as_secs_f64()),
                now,
            ),
        },
    }
}

/// Weighted score of `results`: the sum of weights of passed rules.
pub fn weighted_score(rules: &[ValidationRule], results: &[ValidationResult]) -> f64 {
    rules
        .iter()
        .filter(|rule| results.iter().any(|r| r.rule_id == rule.id && r.passed))
        .map(|rule| rule.weight)
        .sum()
}

/// Whether a step is complete: every rule passed, or the weighted score
/// reached `min_score` when one is set.
pub fn step_complete(
    rules: &[ValidationRule],
    results: &[ValidationResult],
    min_score: Option<f64>,
) -> bool {
    match min_score {
        Some(min) => weighted_score(rules, results) >= min,
        None => rules
            .iter()
            .all(|rule| results.iter().any(|r| r.rule_id == rule.id && r.passed)),
    }
}

/// Where a step is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StepStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

/// Result of one evaluation of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvaluation {
    pub status: StepStatus,
    pub results: Vec<ValidationResult>,
    pub score: f64,
}

impl StepEvaluation {
    pub fn is_complete(&self) -> bool {
        self.status == StepStatus::Passed
    }

    /// Results of rules that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> + '_ {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Tracks one step across the commands a learner issues while on it.
#[derive(Debug, Clone)]
pub struct StepTracker {
    step_id: String,
    rules: Vec<ValidationRule>,
    min_score: Option<f64>,
    config: ValidationConfig,
    status: StepStatus,
    latched: BTreeSet<String>,
    attempts: u32,
}

impl StepTracker {
    pub fn new(
        step_id: impl Into<String>,
        rules: Vec<ValidationRule>,
        min_score: Option<f64>,
        config: ValidationConfig,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            rules,
            min_score,
            config,
            status: StepStatus::Pending,
            latched: BTreeSet::new(),
            attempts: 0,
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Number of evaluations so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Evaluate every rule against one command.
    ///
    /// Once the step has passed, further calls report `Passed` without
    /// re-evaluating.
    pub fn evaluate(&mut self, input: &EvaluationInput<'_>, store: &ClusterStore) -> StepEvaluation {
        if self.status == StepStatus::Passed {
            return StepEvaluation {
                status: StepStatus::Passed,
                results: Vec::new(),
                score: self.rules.iter().map(|r| r.weight).sum(),
            };
        }
        self.attempts += 1;

        let results: Vec<ValidationResult> = self
            .rules
            .iter()
            .map(|rule| {
                if self.config.latch_event_rules
                    && rule.kind.is_event()
                    && self.latched.contains(&rule.id)
                {
                    return ValidationResult::pass(rule, "Already satisfied", input.now);
                }
                evaluate_rule(rule, input, store, self.config.match_policy)
            })
            .collect();

        if self.config.latch_event_rules {
            for (rule, result) in self.rules.iter().zip(&results) {
                if result.passed && rule.kind.is_event() {
                    self.latched.insert(rule.id.clone());
                }
            }
        }

        let score = weighted_score(&self.rules, &results);
        let complete = step_complete(&self.rules, &results, self.min_score);
        self.status = if complete {
            StepStatus::Passed
        } else {
            StepStatus::Failed
        };

        if complete {
            info!(step = %self.step_id, attempts = self.attempts, score, "Step passed");
        } else {
            debug!(
                step = %self.step_id,
                attempts = self.attempts,
                score,
                failing = results.iter().filter(|r| !r.passed).count(),
                "Step not yet complete"
            );
        }

        StepEvaluation {
            status: self.status,
            results,
            score,
        }
    }

    /// Back to `Pending`, forgetting latched rules.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.latched.clear();
        self.attempts = 0;
    }
}
