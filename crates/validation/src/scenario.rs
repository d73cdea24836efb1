//! Scenario definitions and their step-by-step run state.

use crate::engine::{EvaluationInput, StepEvaluation, StepTracker, ValidationConfig};
use crate::rule::ValidationRule;
use gpulab_cluster::{ClusterStore, FaultSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Errors loading a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid scenario file: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("scenario '{0}' has no steps")]
    NoSteps(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("duplicate rule id '{rule}' in step '{step}'")]
    DuplicateRule { step: String, rule: String },
}

/// One graded stage of a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub id: String,
    pub title: String,

    /// What the learner is asked to do.
    #[serde(default)]
    pub objective: String,

    /// Revealed one at a time, in order.
    #[serde(default)]
    pub hints: Vec<String>,

    pub rules: Vec<ValidationRule>,

    /// When set, the step completes once the weighted score of passed rules
    /// reaches this value instead of requiring every rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

/// A scripted exercise: faults to inject and steps to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    /// Exam domain this scenario practices.
    #[serde(default)]
    pub domain: String,

    #[serde(default)]
    pub faults: Vec<FaultSpec>,

    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Parse and check a scenario from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = toml::from_str(text)?;
        scenario.check()?;
        Ok(scenario)
    }

    /// Load a scenario file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Structural checks serde cannot express.
    pub fn check(&self) -> Result<(), ScenarioError> {
        if self.steps.is_empty() {
            return Err(ScenarioError::NoSteps(self.id.clone()));
        }
        let mut step_ids = BTreeSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(ScenarioError::DuplicateStep(step.id.clone()));
            }
            let mut rule_ids = BTreeSet::new();
            for rule in &step.rules {
                if !rule_ids.insert(rule.id.as_str()) {
                    return Err(ScenarioError::DuplicateRule {
                        step: step.id.clone(),
                        rule: rule.id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply this scenario's faults to a store.
    pub fn inject_faults(&self, store: &mut ClusterStore) -> Result<(), gpulab_cluster::ClusterError> {
        store.inject_all(&self.faults)
    }
}

/// What happened when a command was evaluated against the running scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioProgress {
    /// Step the command was evaluated against.
    pub step_id: String,
    pub evaluation: StepEvaluation,
    /// The step passed and the run moved on.
    pub advanced: bool,
    /// Every step is now complete.
    pub finished: bool,
}

/// A learner's progress through one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    scenario: Scenario,
    config: ValidationConfig,
    current: usize,
    tracker: Option<StepTracker>,
    hints_shown: usize,
}

impl ScenarioRun {
    pub fn new(scenario: Scenario, config: ValidationConfig) -> Self {
        let tracker = scenario
            .steps
            .first()
            .map(|step| tracker_for(step, &config));
        Self {
            scenario,
            config,
            current: 0,
            tracker,
            hints_shown: 0,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Step the learner is on, `None` once finished.
    pub fn current_step(&self) -> Option<&ScenarioStep> {
        self.scenario.steps.get(self.current)
    }

    /// Zero-based index of the current step.
    pub fn step_index(&self) -> usize {
        self.current
    }

    pub fn total_steps(&self) -> usize {
        self.scenario.steps.len()
    }

    pub fn is_complete(&self) -> bool {
        self.current >= self.scenario.steps.len()
    }

    /// Evaluate a command against the current step, advancing on pass.
    ///
    /// Returns `None` once the scenario is finished.
    pub fn evaluate(
        &mut self,
        input: &EvaluationInput<'_>,
        store: &ClusterStore,
    ) -> Option<ScenarioProgress> {
        let step_id = self.current_step()?.id.clone();
        let tracker = self.tracker.as_mut()?;
        let evaluation = tracker.evaluate(input, store);

        let advanced = evaluation.is_complete();
        if advanced {
            self.current += 1;
            self.hints_shown = 0;
            self.tracker = self
                .scenario
                .steps
                .get(self.current)
                .map(|step| tracker_for(step, &self.config));
            info!(
                scenario = %self.scenario.id,
                step = %step_id,
                next = self.current,
                total = self.scenario.steps.len(),
                "Scenario step complete"
            );
        }

        Some(ScenarioProgress {
            step_id,
            evaluation,
            advanced,
            finished: self.is_complete(),
        })
    }

    /// Reveal the next hint of the current step.
    ///
    /// Returns `None` when there is no step or every hint is already shown.
    pub fn next_hint(&mut self) -> Option<&str> {
        let step = self.scenario.steps.get(self.current)?;
        let hint = step.hints.get(self.hints_shown)?;
        self.hints_shown += 1;
        Some(hint.as_str())
    }

    /// Hints of the current step revealed so far.
    pub fn hints_shown(&self) -> usize {
        self.hints_shown
    }

    /// Start over from the first step.
    pub fn restart(&mut self) {
        self.current = 0;
        self.hints_shown = 0;
        self.tracker = self
            .scenario
            .steps
            .first()
            .map(|step| tracker_for(step, &self.config));
    }
}

fn tracker_for(step: &ScenarioStep, config: &ValidationConfig) -> StepTracker {
    StepTracker::new(step.id.clone(), step.rules.clone(), step.min_score, config.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_test_helpers::default_store;
    use tracing_test::traced_test;

    const XID_63: &str = r#"
id = "xid-63"
title = "Row remap after XID 63"
domain = "troubleshooting"

[[faults]]
type = "xid"
node = "dgx-00"
gpu = 0
code = 63

[[steps]]
id = "inspect"
title = "Find the faulty GPU"
hints = ["Health checks live in dcgmi.", "Try: dcgmi health -c"]

  [[steps.rules]]
  id = "ran-health"
  kind = "command_executed"
  commands = ["dcgmi health -c"]

  [[steps.rules]]
  id = "saw-xid"
  kind = "output_match"
  pattern = "xid 63"

[[steps]]
id = "reset"
title = "Reset GPU 0"

  [[steps.rules]]
  id = "ran-reset"
  kind = "command_executed"
  commands = ["nvidia-smi -r -i 0"]
"#;

    #[test]
    fn test_load_from_toml() {
        let scenario = Scenario::from_toml_str(XID_63).unwrap();
        assert_eq!(scenario.steps.len(), 2);
        assert_eq!(scenario.faults.len(), 1);
        assert_eq!(scenario.steps[0].hints.len(), 2);

        let mut store = default_store();
        scenario.inject_faults(&mut store).unwrap();
        assert_eq!(store.cluster().nodes[0].xid_count(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xid.toml");
        std::fs::write(&path, XID_63).unwrap();
        assert_eq!(Scenario::load(&path).unwrap().id, "xid-63");

        let missing = Scenario::load(dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ScenarioError::Io { .. })));
    }

    #[test]
    fn test_structural_errors() {
        let empty = "id = \"e\"\ntitle = \"Empty\"\nsteps = []\n";
        assert!(matches!(Scenario::from_toml_str(empty), Err(ScenarioError::NoSteps(_))));

        let dup = r#"
id = "d"
title = "Dup"
[[steps]]
id = "a"
title = "A"
rules = []
[[steps]]
id = "a"
title = "A again"
rules = []
"#;
        assert!(matches!(Scenario::from_toml_str(dup), Err(ScenarioError::DuplicateStep(_))));
        assert!(matches!(Scenario::from_toml_str("id = 3"), Err(ScenarioError::Decode(_))));
    }

    #[traced_test]
    #[test]
    fn test_run_advances_and_finishes() {
        let store = default_store();
        let scenario = Scenario::from_toml_str(XID_63).unwrap();
        let mut run = ScenarioRun::new(scenario, ValidationConfig::default());
        assert_eq!(run.current_step().map(|s| s.id.as_str()), Some("inspect"));

        let output = "GPU 0 : Warning\n  XID 63 detected on GPU 0\n";
        let progress = run
            .evaluate(&EvaluationInput::new("dcgmi health -c", output), &store)
            .unwrap();
        assert!(progress.advanced);
        assert!(!progress.finished);
        assert_eq!(run.step_index(), 1);

        let progress = run
            .evaluate(&EvaluationInput::new("nvidia-smi -i 0 -r", "All done."), &store)
            .unwrap();
        assert_eq!(progress.step_id, "reset");
        assert!(progress.finished);
        assert!(run.is_complete());
        assert!(run.evaluate(&EvaluationInput::new("sinfo", ""), &store).is_none());
        assert!(logs_contain("Scenario step complete"));
    }

    #[test]
    fn test_hints_in_order() {
        let scenario = Scenario::from_toml_str(XID_63).unwrap();
        let mut run = ScenarioRun::new(scenario, ValidationConfig::default());
        assert_eq!(run.next_hint(), Some("Health checks live in dcgmi."));
        assert_eq!(run.next_hint(), Some("Try: dcgmi health -c"));
        assert_eq!(run.next_hint(), None);
        assert_eq!(run.hints_shown(), 2);

        run.restart();
        assert_eq!(run.hints_shown(), 0);
    }
}
