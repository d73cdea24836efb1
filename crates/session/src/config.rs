//! Session configuration.

use gpulab_cluster::ClusterConfig;
use gpulab_learning::SchedulerConfig;
use gpulab_types::NodeId;
use gpulab_validation::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading a [`SessionConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Decode(#[from] toml::de::Error),
}

/// Everything needed to start a session.
///
/// Every section is optional in TOML:
///
/// ```toml
/// start_node = "dgx-01"
///
/// [cluster]
/// num_nodes = 2
///
/// [validation]
/// match_policy = "strict"
///
/// [env]
/// CUDA_VISIBLE_DEVICES = "0,1"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cluster: ClusterConfig,
    pub validation: ValidationConfig,
    pub scheduler: SchedulerConfig,

    /// Node the learner starts on. Defaults to the first node.
    pub start_node: Option<NodeId>,

    /// Initial shell environment.
    pub env: BTreeMap<String, String>,

    /// Commands kept by the `history` builtin.
    pub history_limit: usize,

    /// Seed for practice-mode random faults.
    pub fault_seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            validation: ValidationConfig::default(),
            scheduler: SchedulerConfig::default(),
            start_node: None,
            env: BTreeMap::new(),
            history_limit: 1000,
            fault_seed: 42,
        }
    }
}

impl SessionConfig {
    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_start_node(mut self, node: NodeId) -> Self {
        self.start_node = Some(node);
        self
    }

    /// Set one environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Seed both the baseline sensor jitter and random fault draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.cluster.seed = seed;
        self.fault_seed = seed;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulab_validation::MatchPolicy;
    use std::io::Write;

    #[test]
    fn test_empty_toml_is_default() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = SessionConfig::from_toml_str(
            r#"
            start_node = "dgx-01"
            history_limit = 5

            [cluster]
            num_nodes = 2
            gpus_per_node = 4

            [validation]
            match_policy = "strict"

            [env]
            CUDA_VISIBLE_DEVICES = "0,1"
            "#,
        )
        .unwrap();
        assert_eq!(config.start_node, Some(NodeId::new("dgx-01")));
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.cluster.num_nodes, 2);
        assert_eq!(config.cluster.gpus_per_node, 4);
        assert_eq!(config.cluster.name, "dgx-cluster");
        assert_eq!(config.validation.match_policy, MatchPolicy::Strict);
        assert!(config.validation.latch_event_rules);
        assert_eq!(config.env["CUDA_VISIBLE_DEVICES"], "0,1");
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fault_seed = 7").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.fault_seed, 7);
    }

    #[test]
    fn test_load_errors() {
        assert!(matches!(
            SessionConfig::load("/nonexistent/gpulab.toml"),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("history_limit = \"lots\""),
            Err(ConfigError::Decode(_))
        ));
    }

    #[test]
    fn test_with_seed_sets_both() {
        let config = SessionConfig::default().with_seed(9);
        assert_eq!(config.cluster.seed, 9);
        assert_eq!(config.fault_seed, 9);
    }
}
