//! Error types for the composition model.

use rootalign_core::CoreError;
use rootalign_nlp::NlpError;
use thiserror::Error;

/// Errors raised while building, running or training a [`RootAlign`](crate::RootAlign) model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Bad tree, bad word index, or bad embedding input.
    #[error(transparent)]
    Nlp(#[from] NlpError),

    /// A gradient tape could not be wired or evaluated.
    #[error("Tape error: {0}")]
    Graph(#[from] CoreError),

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Two pieces of the model disagree on a dimension.
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Label {label} out of range for {relation_num} relations")]
    InvalidLabel { label: usize, relation_num: usize },

    /// Configuration or checkpoint JSON could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// A scoring worker panicked or was cancelled.
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ModelError {
    pub(crate) fn shape(expected: impl ToString, got: impl ToString) -> Self {
        ModelError::ShapeMismatch {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

impl From<std::io::Error> for ModelError {
    fn from(e: std::io::Error) -> Self {
        ModelError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Config(e.to_string())
    }
}
