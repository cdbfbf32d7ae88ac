//! Checkpoint serialization for FGCNN models.
//!
//! This crate persists named parameter tensors together with the metadata
//! needed to rebuild the model that owns them.
//!
//! # Core Components
//!
//! - [`Checkpointer`]: Trait for checkpoint serialization implementations
//! - [`JsonCheckpointer`] / [`BinaryCheckpointer`]: JSON and bincode formats
//! - [`CheckpointManager`]: Manages checkpoint lifecycle (save, restore, cleanup)
//! - [`ModelState`]: Complete model state representation
//!
//! # Examples
//!
//! ```no_run
//! use fgcnn_checkpoint::{CheckpointConfig, CheckpointManager, JsonCheckpointer, ModelState};
//!
//! fn main() -> fgcnn_checkpoint::Result<()> {
//!     let config = CheckpointConfig::new("/tmp/checkpoints").with_max_to_keep(5);
//!     let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());
//!
//!     let mut state = ModelState::new(1000);
//!     state.add_param("dense/kernel", vec![4, 2], vec![0.0; 8])?;
//!     manager.save(&state)?;
//!
//!     let restored = manager.restore_latest()?;
//!     assert_eq!(restored.global_step, 1000);
//!     Ok(())
//! }
//! ```
//!
//! # Checkpoint Formats
//!
//! - **JSON** (`checkpoint-<step>.json`): Human-readable, good for debugging
//! - **Binary** (`checkpoint-<step>.bin`): bincode, compact and fast

pub mod checkpointer;
pub mod manager;
pub mod state;

pub use checkpointer::{BinaryCheckpointer, Checkpointer, JsonCheckpointer};
pub use manager::{CheckpointConfig, CheckpointInfo, CheckpointManager};
pub use state::{ModelState, ParamState, CHECKPOINT_VERSION};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// I/O error during checkpoint operations.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint file not found.
    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    /// Error during JSON serialization.
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Error during JSON deserialization.
    #[error("Deserialization error: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Error in the binary encoding.
    #[error("Binary encoding error: {0}")]
    Bincode(#[source] bincode::Error),

    /// Checkpoint version mismatch.
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version.
        expected: u32,
        /// Found version.
        found: u32,
    },

    /// A parameter the model expects is absent from the checkpoint.
    #[error("Missing parameter in checkpoint: {0}")]
    MissingParameter(String),

    /// The checkpoint holds a parameter the model does not have.
    #[error("Unexpected parameter in checkpoint: {0}")]
    UnexpectedParameter(String),

    /// A stored parameter has a different shape than the model's.
    #[error("Shape mismatch for parameter {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Parameter name.
        name: String,
        /// Shape in the model.
        expected: Vec<usize>,
        /// Shape in the checkpoint.
        found: Vec<usize>,
    },

    /// Corrupted checkpoint data.
    #[error("Corrupted checkpoint: {0}")]
    Corrupted(String),
}

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_end_to_end_checkpoint_workflow() {
        let dir = tempdir().unwrap();

        let config = CheckpointConfig::new(dir.path()).with_max_to_keep(3);
        let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());

        let mut state = ModelState::new(1000);
        state
            .add_param("raw/embedding/user", vec![3, 2], vec![0.1; 6])
            .unwrap();
        state
            .add_param("prediction/bias", vec![1], vec![0.5])
            .unwrap();
        state.set_metadata("model", "fgcnn");

        let info = manager.save(&state).unwrap();
        assert_eq!(info.global_step, 1000);
        assert!(info.path.to_string_lossy().ends_with("checkpoint-1000.bin"));

        let restored = manager.restore_latest().unwrap();
        assert_eq!(restored.global_step, 1000);
        assert_eq!(restored.params.len(), 2);
        assert_eq!(restored.param("prediction/bias").unwrap().values, vec![0.5]);
        assert_eq!(restored.metadata.get("model").map(String::as_str), Some("fgcnn"));
    }

    #[test]
    fn test_error_display() {
        let err = CheckpointError::ShapeMismatch {
            name: "w".to_string(),
            expected: vec![2, 2],
            found: vec![4],
        };
        assert!(err.to_string().contains("Shape mismatch for parameter w"));
    }
}
