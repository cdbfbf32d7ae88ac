//! Model state representation for checkpointing.
//!
//! Parameters are stored by name in a sorted map so that the serialized form
//! is stable across runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CheckpointError, Result};

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// One named parameter tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamState {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub values: Vec<f32>,
}

impl ParamState {
    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Complete model state for checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelState {
    /// Version of the checkpoint format.
    pub version: u32,

    /// Global training step at checkpoint time.
    pub global_step: u64,

    /// Timestamp when checkpoint was created (Unix epoch seconds).
    pub timestamp: u64,

    /// Parameter tensors keyed by name.
    pub params: BTreeMap<String, ParamState>,

    /// Additional metadata about the model/training.
    pub metadata: BTreeMap<String, String>,
}

impl ModelState {
    /// Create a new empty model state.
    pub fn new(global_step: u64) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            global_step,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            params: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Add a parameter tensor.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupted`] if `values` does not match `shape`.
    pub fn add_param(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        values: Vec<f32>,
    ) -> Result<()> {
        let name = name.into();
        let param = ParamState { shape, values };
        if param.numel() != param.values.len() {
            return Err(CheckpointError::Corrupted(format!(
                "parameter {name} has {} values for shape {:?}",
                param.values.len(),
                param.shape
            )));
        }
        self.params.insert(name, param);
        Ok(())
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamState> {
        self.params.get(name)
    }

    /// Set metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Get metadata value.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Total number of scalar parameters.
    pub fn total_values(&self) -> usize {
        self.params.values().map(|p| p.values.len()).sum()
    }

    /// Checks the format version and that every parameter's values match
    /// its shape.
    pub fn validate(&self) -> Result<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: CHECKPOINT_VERSION,
                found: self.version,
            });
        }
        for (name, param) in &self.params {
            if param.numel() != param.values.len() {
                return Err(CheckpointError::Corrupted(format!(
                    "parameter {name} has {} values for shape {:?}",
                    param.values.len(),
                    param.shape
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_state_new() {
        let state = ModelState::new(5000);
        assert_eq!(state.version, CHECKPOINT_VERSION);
        assert_eq!(state.global_step, 5000);
        assert!(state.params.is_empty());
    }

    #[test]
    fn test_add_param_checks_shape() {
        let mut state = ModelState::new(0);
        state.add_param("w", vec![2, 3], vec![0.0; 6]).unwrap();
        assert!(state.add_param("bad", vec![2, 3], vec![0.0; 5]).is_err());
        assert_eq!(state.total_values(), 6);
    }

    #[test]
    fn test_validate_version() {
        let mut state = ModelState::new(0);
        state.version = 99;
        assert!(matches!(
            state.validate(),
            Err(CheckpointError::VersionMismatch {
                expected: 1,
                found: 99
            })
        ));
    }

    #[test]
    fn test_model_state_serialization() {
        let mut state = ModelState::new(100);
        state.set_metadata("test", "value");
        state.add_param("b", vec![1], vec![2.0]).unwrap();

        let json = serde_json::to_string(&state).expect("Failed to serialize");
        let restored: ModelState = serde_json::from_str(&json).expect("Failed to deserialize");

        assert_eq!(restored.global_step, 100);
        assert_eq!(restored.metadata("test"), Some("value"));
        assert_eq!(restored.param("b"), state.param("b"));
    }
}
