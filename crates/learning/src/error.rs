//! Error types for persisting learner state.

use std::path::PathBuf;
use thiserror::Error;

/// Errors saving or loading learning state.
///
/// Scheduling itself never fails; boundary conditions clamp.
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("learning state I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("learning state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
