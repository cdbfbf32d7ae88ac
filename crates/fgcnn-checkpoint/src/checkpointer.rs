//! Checkpointer trait for save/restore operations.
//!
//! Two formats are provided: JSON for inspection and bincode for compact
//! storage. Both use the `checkpoint-<step>.<ext>` naming scheme so that the
//! latest checkpoint in a directory can be found by step number.

use crate::state::ModelState;
use crate::{CheckpointError, Result};
use std::path::{Path, PathBuf};

/// Trait for checkpoint serialization and deserialization.
///
/// # Examples
///
/// ```no_run
/// use fgcnn_checkpoint::{Checkpointer, JsonCheckpointer, ModelState};
/// use std::path::Path;
///
/// fn main() -> fgcnn_checkpoint::Result<()> {
///     let checkpointer = JsonCheckpointer::new();
///     let state = ModelState::new(1000);
///
///     let path = checkpointer.checkpoint_path(Path::new("/tmp/ckpt"), state.global_step);
///     checkpointer.save(&path, &state)?;
///
///     let restored = checkpointer.restore(&path)?;
///     assert_eq!(restored.global_step, 1000);
///     Ok(())
/// }
/// ```
pub trait Checkpointer: Send + Sync {
    /// File extension (without the dot) written by this checkpointer.
    fn extension(&self) -> &'static str;

    /// Save model state to the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or I/O fails.
    fn save(&self, path: &Path, state: &ModelState) -> Result<()>;

    /// Restore model state from the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint doesn't exist, is corrupted,
    /// has an unsupported version, or deserialization fails.
    fn restore(&self, path: &Path) -> Result<ModelState>;

    /// Path of the checkpoint for `step` inside `dir`.
    fn checkpoint_path(&self, dir: &Path, step: u64) -> PathBuf {
        dir.join(format!("checkpoint-{}.{}", step, self.extension()))
    }

    /// Parse the step number from a checkpoint filename of this format.
    fn parse_step(&self, filename: &str) -> Option<u64> {
        filename
            .strip_prefix("checkpoint-")?
            .strip_suffix(self.extension())?
            .strip_suffix('.')?
            .parse()
            .ok()
    }

    /// Find the checkpoint with the highest step in a directory.
    ///
    /// Returns `None` if the directory does not exist or holds no
    /// checkpoint of this format.
    fn latest(&self, dir: &Path) -> Option<PathBuf> {
        let entries = std::fs::read_dir(dir).ok()?;
        let mut latest: Option<(u64, PathBuf)> = None;

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(step) = path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(|f| self.parse_step(f))
            else {
                continue;
            };
            if latest.as_ref().map_or(true, |(best, _)| step > *best) {
                latest = Some((step, path));
            }
        }

        latest.map(|(_, path)| path)
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }
    std::fs::read(path).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|e| CheckpointError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// JSON-based checkpoint implementation.
#[derive(Debug, Clone, Default)]
pub struct JsonCheckpointer {
    /// Whether to pretty-print JSON output.
    pub pretty: bool,
}

impl JsonCheckpointer {
    /// Create a new JSON checkpointer.
    pub fn new() -> Self {
        Self { pretty: false }
    }

    /// Create a new JSON checkpointer with pretty printing.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Checkpointer for JsonCheckpointer {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "Saving checkpoint");
        create_parent(path)?;

        let json = if self.pretty {
            serde_json::to_vec_pretty(state)
        } else {
            serde_json::to_vec(state)
        }
        .map_err(CheckpointError::Serialization)?;

        write_bytes(path, &json)?;
        tracing::debug!(path = %path.display(), size = json.len(), "Checkpoint saved");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        tracing::info!(path = %path.display(), "Restoring checkpoint");

        let bytes = read_bytes(path)?;
        let state: ModelState =
            serde_json::from_slice(&bytes).map_err(CheckpointError::Deserialization)?;
        state.validate()?;

        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            params = state.params.len(),
            "Checkpoint restored"
        );
        Ok(state)
    }
}

/// Binary checkpoint implementation using bincode.
#[derive(Debug, Clone, Default)]
pub struct BinaryCheckpointer;

impl BinaryCheckpointer {
    /// Create a new binary checkpointer.
    pub fn new() -> Self {
        Self
    }
}

impl Checkpointer for BinaryCheckpointer {
    fn extension(&self) -> &'static str {
        "bin"
    }

    fn save(&self, path: &Path, state: &ModelState) -> Result<()> {
        tracing::info!(path = %path.display(), step = state.global_step, "Saving binary checkpoint");
        create_parent(path)?;

        let bytes = bincode::serialize(state).map_err(CheckpointError::Bincode)?;
        write_bytes(path, &bytes)?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "Checkpoint saved");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<ModelState> {
        tracing::info!(path = %path.display(), "Restoring binary checkpoint");

        let bytes = read_bytes(path)?;
        let state: ModelState = bincode::deserialize(&bytes).map_err(CheckpointError::Bincode)?;
        state.validate()?;

        tracing::info!(
            path = %path.display(),
            step = state.global_step,
            params = state.params.len(),
            "Checkpoint restored"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_state(step: u64) -> ModelState {
        let mut state = ModelState::new(step);
        state
            .add_param("dense_0/kernel", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap();
        state.set_metadata("config", "{}");
        state
    }

    #[test]
    fn test_json_save_restore() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::pretty();
        let path = checkpointer.checkpoint_path(dir.path(), 1000);

        checkpointer.save(&path, &sample_state(1000)).unwrap();
        let restored = checkpointer.restore(&path).unwrap();

        assert_eq!(restored.global_step, 1000);
        assert_eq!(
            restored.param("dense_0/kernel").unwrap().values,
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(restored.metadata("config"), Some("{}"));
    }

    #[test]
    fn test_binary_save_restore() {
        let dir = tempdir().unwrap();
        let checkpointer = BinaryCheckpointer::new();
        let path = checkpointer.checkpoint_path(dir.path(), 7);

        checkpointer.save(&path, &sample_state(7)).unwrap();
        let restored = checkpointer.restore(&path).unwrap();

        assert_eq!(restored.global_step, 7);
        assert_eq!(restored.param("dense_0/kernel").unwrap().shape, vec![2, 2]);
    }

    #[test]
    fn test_restore_missing_file() {
        let dir = tempdir().unwrap();
        let result = JsonCheckpointer::new().restore(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn test_restore_rejects_future_version() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::new();
        let path = checkpointer.checkpoint_path(dir.path(), 1);
        let mut state = sample_state(1);
        state.version = 2;
        checkpointer.save(&path, &state).unwrap();

        assert!(matches!(
            checkpointer.restore(&path),
            Err(CheckpointError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_restore_garbage_binary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint-1.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(BinaryCheckpointer::new().restore(&path).is_err());
    }

    #[test]
    fn test_parse_step() {
        let json = JsonCheckpointer::new();
        assert_eq!(json.parse_step("checkpoint-1000.json"), Some(1000));
        assert_eq!(json.parse_step("checkpoint-0.json"), Some(0));
        assert_eq!(json.parse_step("checkpoint-1000.bin"), None);
        assert_eq!(json.parse_step("checkpoint-abc.json"), None);
        assert_eq!(json.parse_step("other-1000.json"), None);
        assert_eq!(json.parse_step("checkpoint-5xjson"), None);
    }

    #[test]
    fn test_latest_checkpoint() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::new();

        for step in [100, 500, 200] {
            let path = checkpointer.checkpoint_path(dir.path(), step);
            checkpointer.save(&path, &sample_state(step)).unwrap();
        }

        let latest = checkpointer.latest(dir.path()).unwrap();
        assert!(latest.to_string_lossy().contains("checkpoint-500.json"));
    }

    #[test]
    fn test_latest_finds_step_zero() {
        let dir = tempdir().unwrap();
        let checkpointer = BinaryCheckpointer::new();
        let path = checkpointer.checkpoint_path(dir.path(), 0);
        checkpointer.save(&path, &sample_state(0)).unwrap();

        assert_eq!(checkpointer.latest(dir.path()), Some(path));
    }

    #[test]
    fn test_latest_empty_or_missing_dir() {
        let dir = tempdir().unwrap();
        let checkpointer = JsonCheckpointer::new();
        assert!(checkpointer.latest(dir.path()).is_none());
        assert!(checkpointer.latest(&dir.path().join("missing")).is_none());
    }
}
