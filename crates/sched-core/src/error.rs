//! Error types shared across the scheduling core

use std::path::PathBuf;

/// Errors surfaced by the scheduling and accounting engine
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// A telemetry read failed or overran its deadline. Recoverable per tick.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// The decision model or its normalization parameters could not be loaded.
    /// Fatal at startup.
    #[error("failed to load model artifact {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error("invalid normalization parameters: {0}")]
    Normalization(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("stress controller: {0}")]
    Stress(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SchedError {
    pub fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SchedError::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error should abort the process rather than the current tick
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SchedError::ModelLoad { .. } | SchedError::Normalization(_) | SchedError::Config(_)
        )
    }
}

pub type SchedResult<T> = std::result::Result<T, SchedError>;
