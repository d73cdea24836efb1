//! Session error types.

use crate::config::ConfigError;
use gpulab_cluster::ClusterError;
use gpulab_learning::LearningError;
use gpulab_types::NodeId;
use gpulab_validation::ScenarioError;
use thiserror::Error;

/// Errors setting up or reconfiguring a session.
///
/// Commands never produce these; a failing command is a non-zero exit code in
/// its [`CommandResult`](gpulab_core::CommandResult).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Learning(#[from] LearningError),

    #[error("start node {0} is not part of the cluster")]
    UnknownNode(NodeId),

    #[error("cluster has no nodes")]
    NoNodes,
}
