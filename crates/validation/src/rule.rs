//! Validation rules and their results.

use gpulab_types::{GpuIndex, NodeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_weight() -> f64 {
    1.0
}

/// One gradable condition attached to a scenario step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Unique within its step.
    pub id: String,

    /// Contribution to the step score when the step sets `min_score`.
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(flatten)]
    pub kind: RuleKind,
}

impl ValidationRule {
    /// Rule with weight 1.0.
    pub fn new(id: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id: id.into(),
            weight: default_weight(),
            kind,
        }
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// What a rule checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    /// The executed command matches one of `commands`.
    CommandExecuted { commands: Vec<String> },

    /// The command output matches `pattern`, case-insensitively.
    OutputMatch { pattern: String },

    /// A named predicate over live cluster state holds.
    StateCheck(StateCheck),

    /// The command completed within `max_secs` of simulated time.
    TimeLimit { max_secs: f64 },
}

impl RuleKind {
    /// Command-executed rule over the given templates.
    pub fn command<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RuleKind::CommandExecuted {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Output-match rule.
    pub fn output(pattern: impl Into<String>) -> Self {
        RuleKind::OutputMatch {
            pattern: pattern.into(),
        }
    }

    /// Whether a pass of this kind is tied to one specific command.
    ///
    /// These are the kinds a step may latch: once satisfied they stay
    /// satisfied for the rest of the step.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            RuleKind::CommandExecuted { .. } | RuleKind::OutputMatch { .. }
        )
    }

    /// Short name for messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            RuleKind::CommandExecuted { .. } => "command_executed",
            RuleKind::OutputMatch { .. } => "output_match",
            RuleKind::StateCheck(_) => "state_check",
            RuleKind::TimeLimit { .. } => "time_limit",
        }
    }
}

/// Parameters of a state-check rule.
///
/// `check` names the predicate; see [`crate::predicate`] for the catalog.
/// Unset scope fields widen the check to every node or every GPU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateCheck {
    pub check: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuIndex>,

    /// Numeric parameter (temperature ceiling, for instance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Text parameter (expected Slurm state, for instance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
}

impl StateCheck {
    /// Check named `check` over the whole cluster.
    pub fn new(check: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            ..Self::default()
        }
    }

    pub fn on_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn on_gpu(mut self, gpu: GpuIndex) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }
}

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// Id of the rule this result belongs to.
    pub rule_id: String,
    pub passed: bool,
    pub message: String,
    /// Simulation time of the evaluation.
    pub timestamp: Duration,
}

impl ValidationResult {
    pub fn pass(rule: &ValidationRule, message: impl Into<String>, timestamp: Duration) -> Self {
        Self {
            rule_id: rule.id.clone(),
            passed: true,
            message: message.into(),
            timestamp,
        }
    }

    pub fn fail(rule: &ValidationRule, message: impl Into<String>, timestamp: Duration) -> Self {
        Self {
            rule_id: rule.id.clone(),
            passed: false,
            message: message.into(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_decode_from_toml() {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<ValidationRule>,
        }

        let doc: Doc = toml::from_str(
            r#"
            [[rules]]
            id = "ran-reset"
            kind = "command_executed"
            commands = ["nvidia-smi -r -i 0"]

            [[rules]]
            id = "healthy"
            kind = "state_check"
            weight = 2
            check = "gpu_healthy"
            node = "dgx-00"
            gpu = 0

            [[rules]]
            id = "fast"
            kind = "time_limit"
            max_secs = 30.0
            "#,
        )
        .unwrap();

        assert_eq!(doc.rules.len(), 3);
        assert_eq!(doc.rules[0].weight, 1.0);
        assert_eq!(
            doc.rules[0].kind,
            RuleKind::command(["nvidia-smi -r -i 0"])
        );
        assert_eq!(doc.rules[1].weight, 2.0);
        assert_eq!(
            doc.rules[1].kind,
            RuleKind::StateCheck(
                StateCheck::new("gpu_healthy")
                    .on_node(NodeId::new("dgx-00"))
                    .on_gpu(GpuIndex(0))
            )
        );
        assert!(!doc.rules[2].kind.is_event());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = toml::from_str::<ValidationRule>("id = \"x\"\nkind = \"vibes\"\n");
        assert!(err.is_err());
    }
}
