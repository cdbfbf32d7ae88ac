//! Layer errors.

use thiserror::Error;

/// Everything a layer can reject.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A tensor arrived with the wrong shape.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Shape the layer was built for
        expected: Vec<usize>,
        /// Shape it received
        actual: Vec<usize>,
    },

    /// The trailing (feature) axis has the wrong width.
    #[error("Input width {actual} does not match layer width {expected}")]
    InvalidInputDimension {
        /// Width the layer was built for
        expected: usize,
        /// Width it received
        actual: usize,
    },

    /// Initializer parameters rejected by the distribution.
    #[error("Cannot initialize weights: {message}")]
    InitializationError {
        /// What the distribution reported
        message: String,
    },

    /// A forward pass produced no output, e.g. an empty window.
    #[error("Forward pass failed: {message}")]
    ForwardError {
        /// Reason
        message: String,
    },

    /// `backward` without a cached `forward_train`.
    #[error("backward called before forward_train")]
    NotInitialized,

    /// A layer hyperparameter is out of range.
    #[error("Invalid layer configuration: {message}")]
    ConfigError {
        /// Which hyperparameter and why
        message: String,
    },

    /// Categorical id outside the embedding table.
    #[error("Embedding id {id} out of range for table with {cardinality} rows")]
    IdOutOfRange {
        /// The offending id
        id: usize,
        /// Number of rows in the table
        cardinality: usize,
    },
}

/// Result alias used throughout the crate.
pub type LayerResult<T> = Result<T, LayerError>;
