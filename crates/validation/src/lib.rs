//! Validation engine: decides whether a learner's action satisfies a
//! scenario step.
//!
//! Rules are data ([`ValidationRule`] with a [`RuleKind`] per check) and are
//! evaluated against the last command, its output, its simulated duration,
//! and the live [`gpulab_cluster::ClusterStore`]. A [`StepTracker`] runs the
//! per-step state machine and a [`ScenarioRun`] strings steps together.
//!
//! Invalid rule configuration never aborts a session: a bad pattern or an
//! unknown state check is logged and the rule fails.

mod engine;
mod matcher;
pub mod predicate;
mod rule;
mod scenario;

pub use engine::{
    evaluate_rule, step_complete, weighted_score, EvaluationInput, StepEvaluation, StepStatus,
    StepTracker, ValidationConfig,
};
pub use matcher::{CommandMatcher, MatchKind, MatchPolicy};
pub use predicate::evaluate_state_check;
pub use rule::{RuleKind, StateCheck, ValidationResult, ValidationRule};
pub use scenario::{Scenario, ScenarioError, ScenarioProgress, ScenarioRun, ScenarioStep};
