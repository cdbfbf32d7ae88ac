//! Error types for building, running and persisting FGCNN models.

use fgcnn_checkpoint::CheckpointError;
use fgcnn_layers::LayerError;
use fgcnn_optimizer::OptimizerError;
use thiserror::Error;

/// Errors produced by the FGCNN model crate.
#[derive(Debug, Error)]
pub enum FgcnnError {
    /// Invalid hyperparameters or feature specification.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Shape or dimension error from the layer library.
    #[error("Layer error: {0}")]
    Layer(#[from] LayerError),

    /// A batch does not match the model's inputs.
    #[error("Invalid input for field '{field}': {message}")]
    Input {
        /// Offending field (or `labels`)
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Saving or restoring parameters failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Optimizer construction failed.
    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),
}

impl FgcnnError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        FgcnnError::Validation(message.into())
    }

    pub(crate) fn input(field: impl Into<String>, message: impl Into<String>) -> Self {
        FgcnnError::Input {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result alias for FGCNN operations.
pub type Result<T, E = FgcnnError> = std::result::Result<T, E>;
