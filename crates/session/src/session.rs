//! The learner session state machine.

use crate::config::SessionConfig;
use crate::error::SessionError;
use gpulab_cluster::{ClusterStore, FaultInjector, FaultSpec};
use gpulab_core::{CommandResult, ExecutionContext, ShellEffect};
use gpulab_learning::{Answer, AnswerOutcome, LearningScheduler};
use gpulab_parser::{parse, peek_base, ParsedCommand};
use gpulab_simulators::filters::apply_pipeline;
use gpulab_simulators::SimulatorRegistry;
use gpulab_types::NodeId;
use gpulab_validation::{EvaluationInput, Scenario, ScenarioProgress, ScenarioRun};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Builtin listing recent commands.
pub const HISTORY_BUILTIN: &str = "history";

/// Builtin revealing the next hint of the current scenario step.
pub const HINT_BUILTIN: &str = "hint";

/// What one line of input produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutput {
    pub result: CommandResult,

    /// Validation of the command against the active scenario step. `None`
    /// for builtins, blank lines, or when no scenario is running.
    pub progress: Option<ScenarioProgress>,
}

/// One learner's simulated terminal.
///
/// Owns the cluster store and everything that reads or changes it. Each call
/// to [`execute`](Self::execute) runs to completion before returning: parse,
/// dispatch, apply shell effects, record history, then validate.
///
/// The clock belongs to the caller. Simulated durations are reported to the
/// validator and never advance the clock on their own.
pub struct Session {
    config: SessionConfig,
    store: ClusterStore,
    registry: SimulatorRegistry,
    start_node: NodeId,
    current_node: NodeId,
    env: BTreeMap<String, String>,
    run: Option<ScenarioRun>,
    scheduler: LearningScheduler,
    injector: FaultInjector,
    history: VecDeque<String>,
    /// Commands dropped off the front of `history`.
    history_dropped: usize,
}

impl Session {
    /// Start a session on a healthy cluster with the default simulators.
    pub fn new(config: SessionConfig) -> Result<Self, SessionError> {
        Self::with_registry(config, SimulatorRegistry::with_defaults())
    }

    /// Start a session with a custom simulator set.
    pub fn with_registry(
        config: SessionConfig,
        registry: SimulatorRegistry,
    ) -> Result<Self, SessionError> {
        let store = ClusterStore::new(config.cluster.clone());
        let start_node = match &config.start_node {
            Some(node) if store.has_node(node) => node.clone(),
            Some(node) => return Err(SessionError::UnknownNode(node.clone())),
            None => store
                .cluster()
                .nodes
                .front()
                .map(|n| n.id.clone())
                .ok_or(SessionError::NoNodes)?,
        };

        info!(
            cluster = %config.cluster.name,
            nodes = config.cluster.num_nodes,
            start_node = %start_node,
            "Session started"
        );

        Ok(Self {
            scheduler: LearningScheduler::new(config.scheduler.clone()),
            injector: FaultInjector::new(config.fault_seed),
            env: config.env.clone(),
            current_node: start_node.clone(),
            start_node,
            store,
            registry,
            run: None,
            history: VecDeque::new(),
            history_dropped: 0,
            config,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Command execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one line of learner input.
    pub fn execute(&mut self, line: &str) -> SessionOutput {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return SessionOutput {
                result: CommandResult::empty(),
                progress: None,
            };
        }
        self.record_history(trimmed);

        let builtin = match peek_base(trimmed).as_deref() {
            Some(HISTORY_BUILTIN) => {
                let cmd = parse(trimmed);
                Some((self.history_builtin(&cmd), cmd))
            }
            Some(HINT_BUILTIN) => Some((self.hint_builtin(), parse(trimmed))),
            _ => None,
        };
        if let Some((result, cmd)) = builtin {
            return SessionOutput {
                result: apply_pipeline(&cmd, result),
                progress: None,
            };
        }

        let cmd = self.registry.parse(trimmed);
        let result = {
            let mut ctx = ExecutionContext::new(&mut self.store, &self.current_node, &self.env);
            self.registry.dispatch(&cmd, &mut ctx)
        };
        self.apply_effects(&result);

        debug!(
            command = %cmd.base,
            exit_code = result.exit_code,
            node = %self.current_node,
            "Executed command"
        );

        let progress = self.validate(trimmed, &result);
        SessionOutput { result, progress }
    }

    fn apply_effects(&mut self, result: &CommandResult) {
        for effect in &result.effects {
            match effect {
                ShellEffect::SwitchNode(node) => {
                    debug!(from = %self.current_node, to = %node, "Switching node");
                    self.current_node = node.clone();
                }
            }
        }
    }

    fn validate(&mut self, line: &str, result: &CommandResult) -> Option<ScenarioProgress> {
        let registry = &self.registry;
        let parser = |l: &str| registry.parse(l);
        let mut input = EvaluationInput::new(line, &result.output)
            .at(self.store.now())
            .with_parser(&parser);
        if let Some(elapsed) = result.simulated_duration {
            input = input.with_elapsed(elapsed);
        }
        self.run.as_mut()?.evaluate(&input, &self.store)
    }

    fn record_history(&mut self, line: &str) {
        if self.config.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.history_limit {
            self.history.pop_front();
            self.history_dropped += 1;
        }
        self.history.push_back(line.to_string());
    }

    /// `history [N]`: numbered commands, the last N when given.
    fn history_builtin(&self, cmd: &ParsedCommand) -> CommandResult {
        let count = match cmd.arg(0) {
            None => self.history.len(),
            Some(n) => match n.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    return CommandResult::usage_error(format!(
                        "history: {n}: numeric argument required\n"
                    ))
                }
            },
        };
        let skip = self.history.len().saturating_sub(count);
        let mut out = String::new();
        for (i, line) in self.history.iter().enumerate().skip(skip) {
            let _ = writeln!(out, "{:>5}  {line}", self.history_dropped + i + 1);
        }
        CommandResult::success(out)
    }

    fn hint_builtin(&mut self) -> CommandResult {
        let Some(run) = self.run.as_mut() else {
            return CommandResult::failure("hint: no scenario is running\n");
        };
        if run.is_complete() {
            return CommandResult::success("Scenario complete. No hints left.\n");
        }
        match run.next_hint() {
            Some(hint) => CommandResult::success(format!("Hint: {hint}\n")),
            None => CommandResult::success("No more hints for this step.\n"),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Scenarios and faults
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a scenario on a freshly built cluster.
    ///
    /// Any running scenario is dropped. On error the session has no scenario
    /// and the cluster is healthy.
    pub fn load_scenario(&mut self, scenario: Scenario) -> Result<(), SessionError> {
        scenario.check()?;
        self.run = None;
        self.store.reset_cluster();
        self.current_node = self.start_node.clone();

        if let Err(err) = scenario.inject_faults(&mut self.store) {
            warn!(scenario = %scenario.id, error = %err, "Scenario fault targets missing hardware");
            self.store.reset_cluster();
            return Err(err.into());
        }

        info!(
            scenario = %scenario.id,
            steps = scenario.steps.len(),
            faults = scenario.faults.len(),
            "Scenario loaded"
        );
        self.run = Some(ScenarioRun::new(scenario, self.config.validation.clone()));
        Ok(())
    }

    /// Load a scenario from a TOML file and start it.
    pub fn load_scenario_file(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let scenario = Scenario::load(path)?;
        self.load_scenario(scenario)
    }

    /// Inject one fault into the live cluster.
    pub fn inject_fault(&mut self, fault: &FaultSpec) -> Result<(), SessionError> {
        self.store.inject(fault)?;
        Ok(())
    }

    /// Draw and inject the next practice fault.
    ///
    /// Returns `None` when the cluster has no GPUs to break.
    pub fn inject_random_fault(&mut self) -> Result<Option<FaultSpec>, SessionError> {
        let Some(fault) = self.injector.random_fault(self.store.cluster()) else {
            return Ok(None);
        };
        self.store.inject(&fault)?;
        info!(fault = %fault.describe(), "Injected practice fault");
        Ok(Some(fault))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Learning
    // ═══════════════════════════════════════════════════════════════════════

    /// Grade a review question answer at the current session time.
    pub fn answer_question(&mut self, answer: &Answer) -> AnswerOutcome {
        self.scheduler.record_answer(answer, self.store.now())
    }

    /// Question ids to study now.
    pub fn study_order(&self) -> Vec<String> {
        self.scheduler.study_order(self.store.now())
    }

    pub fn save_learning(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.scheduler.save(path)?;
        Ok(())
    }

    /// Replace learner state with a saved snapshot.
    pub fn load_learning(&mut self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.scheduler = LearningScheduler::load(self.config.scheduler.clone(), path)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Clock and reset
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_time(&mut self, now: Duration) {
        self.store.set_time(now);
    }

    pub fn advance_time(&mut self, by: Duration) {
        self.store.advance_time(by);
    }

    pub fn now(&self) -> Duration {
        self.store.now()
    }

    /// Back to a healthy cluster on the start node at time zero.
    ///
    /// The scenario and command history are dropped. Learning state survives.
    pub fn reset(&mut self) {
        self.store.reset();
        self.current_node = self.start_node.clone();
        self.env = self.config.env.clone();
        self.run = None;
        self.history.clear();
        self.history_dropped = 0;
        self.injector = FaultInjector::new(self.config.fault_seed);
        info!("Session reset");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    /// Shell prompt for the current node.
    pub fn prompt(&self) -> String {
        format!("root@{}:~# ", self.current_node)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ClusterStore {
        &self.store
    }

    pub fn registry(&self) -> &SimulatorRegistry {
        &self.registry
    }

    pub fn current_node(&self) -> &NodeId {
        &self.current_node
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Set a shell environment variable.
    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    pub fn scenario_run(&self) -> Option<&ScenarioRun> {
        self.run.as_ref()
    }

    pub fn scheduler(&self) -> &LearningScheduler {
        &self.scheduler
    }

    pub fn history(&self) -> impl Iterator<Item = &str> + '_ {
        self.history.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_learning::Difficulty;
    use gpulab_test_helpers::{dgx, xid_fault};
    use tracing_test::traced_test;

    fn session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_starts_on_first_node() {
        let s = session();
        assert_eq!(s.current_node(), &dgx(0));
        assert_eq!(s.prompt(), "root@dgx-00:~# ");
    }

    #[test]
    fn test_unknown_start_node() {
        let config = SessionConfig::default().with_start_node(NodeId::new("dgx-99"));
        assert!(matches!(
            Session::new(config),
            Err(SessionError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_blank_line_is_not_history() {
        let mut s = session();
        let out = s.execute("   ");
        assert!(out.result.is_success());
        assert!(out.result.output.is_empty());
        assert_eq!(s.history().count(), 0);
    }

    #[test]
    fn test_history_builtin() {
        let mut s = session();
        s.execute("hostname");
        s.execute("nvidia-smi -L");
        let out = s.execute("history");
        assert_eq!(
            out.result.output,
            "    1  hostname\n    2  nvidia-smi -L\n    3  history\n"
        );

        let last = s.execute("history 1");
        assert_eq!(last.result.output, "    4  history 1\n");

        assert_eq!(s.execute("history many").result.exit_code, 2);
    }

    #[test]
    fn test_history_limit() {
        let config = SessionConfig::default().with_history_limit(2);
        let mut s = Session::new(config).unwrap();
        for line in ["a", "b", "c"] {
            s.execute(line);
        }
        assert_eq!(s.history().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(s.execute("history").result.output, "    3  c\n    4  history\n");
    }

    #[test]
    fn test_history_output_is_filtered() {
        let mut s = session();
        s.execute("hostname");
        s.execute("nvidia-smi -L");
        s.execute("sinfo");

        let out = s.execute("history | grep nvidia");
        assert_eq!(out.result.exit_code, 0);
        assert_eq!(
            out.result.output,
            "    2  nvidia-smi -L\n    4  history | grep nvidia\n"
        );
        assert!(out.progress.is_none());

        let out = s.execute("history | grep -v history");
        assert_eq!(out.result.output.lines().count(), 3);

        let out = s.execute("history | wc -l");
        assert_eq!(out.result.output, "6\n");

        let out = s.execute("hint | wc -l");
        assert_eq!(out.result.exit_code, 1);
        assert_eq!(out.result.output, "hint: no scenario is running\n");
    }

    #[test]
    fn test_hint_without_scenario() {
        let mut s = session();
        assert_eq!(s.execute("hint").result.exit_code, 1);
    }

    #[test]
    fn test_ssh_switches_node() {
        let mut s = session();
        let out = s.execute("ssh dgx-02");
        assert!(out.result.is_success());
        assert_eq!(s.current_node(), &dgx(2));
        assert_eq!(s.execute("hostname").result.output, "dgx-02\n");
    }

    #[test]
    fn test_unknown_command_suggests() {
        let mut s = session();
        let out = s.execute("nvidia-sm");
        assert_eq!(out.result.exit_code, 127);
        assert!(out.result.output.contains("nvidia-smi"));
        assert!(out.progress.is_none());
    }

    #[test]
    #[traced_test]
    fn test_reset_keeps_learning_state() {
        let mut s = session();
        s.inject_fault(&xid_fault(0, 0, 79)).unwrap();
        s.execute("ssh dgx-01");
        s.set_time(Duration::from_secs(600));
        s.answer_question(&Answer::new("q1", "troubleshooting", true, Duration::from_secs(5)));

        s.reset();
        assert_eq!(s.now(), Duration::ZERO);
        assert_eq!(s.current_node(), &dgx(0));
        assert_eq!(s.history().count(), 0);
        assert!(s.store().gpu(&dgx(0), gpulab_types::GpuIndex(0)).unwrap().xid_errors.is_empty());
        assert_eq!(s.scheduler().history().len(), 1);
        assert!(logs_contain("Session reset"));
    }

    #[test]
    fn test_random_faults_follow_seed() {
        let mut a = Session::new(SessionConfig::default().with_seed(3)).unwrap();
        let mut b = Session::new(SessionConfig::default().with_seed(3)).unwrap();
        let fa = a.inject_random_fault().unwrap();
        let fb = b.inject_random_fault().unwrap();
        assert!(fa.is_some());
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_answers_use_session_clock() {
        let mut s = session();
        s.set_time(Duration::from_secs(7200));
        let answer = Answer::new("q1", "bring_up", true, Duration::from_secs(5))
            .with_difficulty(Difficulty::Easy);
        let outcome = s.answer_question(&answer);
        assert_eq!(outcome.next_review, Duration::from_secs(7200 + 3600));
        // Due within the day, so it tops up the study session.
        assert_eq!(s.study_order(), vec!["q1"]);
    }

    #[test]
    fn test_learning_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learning.json");

        let mut s = session();
        s.answer_question(&Answer::new("q1", "bring_up", false, Duration::from_secs(5)));
        s.save_learning(&path).unwrap();

        let mut fresh = session();
        fresh.load_learning(&path).unwrap();
        assert_eq!(fresh.scheduler().question("q1").unwrap().times_answered, 1);
    }
}
