use std::path::Path;

use thiserror::Error;

/// Result alias for model and inference operations.
pub type AiResult<T> = Result<T, AiError>;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("invalid job input: {0}")]
    InvalidInput(String),

    /// Not enough usable samples after cleaning.
    #[error("incomplete data: {0}")]
    DataIncomplete(String),

    /// No persisted artifact triplet for the key. Recovered by training on demand.
    #[error("model not found for {target} at horizon {horizon}d")]
    ModelNotFound { target: String, horizon: u32 },

    #[error("missing features: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),

    /// Artifact read/write/decoding failure.
    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    pub fn artifact(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Artifact(format!("{}: {err}", path.display()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AiError::ModelNotFound { .. })
    }
}
