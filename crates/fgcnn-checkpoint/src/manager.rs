//! Checkpoint manager for tracking and managing checkpoint lifecycle.
//!
//! [`CheckpointManager`] names checkpoints by global step, keeps at most
//! `max_to_keep` of them on disk and restores the newest one on request.

use crate::checkpointer::Checkpointer;
use crate::state::ModelState;
use crate::{CheckpointError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Information about a saved checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointInfo {
    /// Path to the checkpoint file.
    pub path: PathBuf,

    /// Global step at which this checkpoint was saved.
    pub global_step: u64,

    /// Timestamp when checkpoint was created (Unix epoch seconds).
    /// Zero for checkpoints discovered on disk by [`CheckpointManager::initialize`].
    pub timestamp: u64,
}

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Directory where checkpoints are stored.
    pub checkpoint_dir: PathBuf,

    /// Maximum number of checkpoints to keep. Zero keeps everything.
    pub max_to_keep: usize,

    /// Interval in steps between automatic checkpoints.
    /// Set to 0 to disable automatic checkpointing.
    pub checkpoint_interval: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            max_to_keep: 5,
            checkpoint_interval: 1000,
        }
    }
}

impl CheckpointConfig {
    /// Create a new checkpoint configuration rooted at `checkpoint_dir`.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of checkpoints to keep.
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}

/// Manages checkpoint lifecycle including saving, restoring, and cleanup.
pub struct CheckpointManager<C: Checkpointer> {
    config: CheckpointConfig,
    checkpointer: Arc<C>,
    /// Saved checkpoints, oldest first.
    checkpoint_history: VecDeque<CheckpointInfo>,
}

impl<C: Checkpointer> CheckpointManager<C> {
    /// Create a new checkpoint manager.
    pub fn new(config: CheckpointConfig, checkpointer: C) -> Self {
        Self {
            config,
            checkpointer: Arc::new(checkpointer),
            checkpoint_history: VecDeque::new(),
        }
    }

    /// Get the checkpoint directory.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Get the number of tracked checkpoints.
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoint_history.len()
    }

    /// Get the configuration.
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Tracked checkpoints, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &CheckpointInfo> {
        self.checkpoint_history.iter()
    }

    /// Save a checkpoint and drop the oldest ones beyond `max_to_keep`.
    ///
    /// Saving the same step twice overwrites the file and keeps one entry.
    pub fn save(&mut self, state: &ModelState) -> Result<CheckpointInfo> {
        let path = self
            .checkpointer
            .checkpoint_path(&self.config.checkpoint_dir, state.global_step);

        tracing::info!(
            step = state.global_step,
            path = %path.display(),
            "Saving checkpoint via manager"
        );

        self.checkpointer.save(&path, state)?;

        let info = CheckpointInfo {
            path,
            global_step: state.global_step,
            timestamp: state.timestamp,
        };

        self.checkpoint_history.retain(|c| c.path != info.path);
        self.checkpoint_history.push_back(info.clone());
        self.cleanup_old()?;

        Ok(info)
    }

    /// Restore the checkpoint with the highest step.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotFound`] with the directory when it holds
    /// no checkpoint.
    pub fn restore_latest(&self) -> Result<ModelState> {
        let latest_path = self
            .checkpointer
            .latest(&self.config.checkpoint_dir)
            .ok_or_else(|| CheckpointError::NotFound(self.config.checkpoint_dir.clone()))?;

        tracing::info!(path = %latest_path.display(), "Restoring latest checkpoint");
        self.checkpointer.restore(&latest_path)
    }

    /// Restore a specific checkpoint by path.
    pub fn restore(&self, path: &Path) -> Result<ModelState> {
        self.checkpointer.restore(path)
    }

    /// Restore a checkpoint by step number.
    pub fn restore_step(&self, step: u64) -> Result<ModelState> {
        let path = self
            .checkpointer
            .checkpoint_path(&self.config.checkpoint_dir, step);
        self.checkpointer.restore(&path)
    }

    /// Remove the oldest tracked checkpoints until at most `max_to_keep` remain.
    pub fn cleanup_old(&mut self) -> Result<()> {
        if self.config.max_to_keep == 0 {
            return Ok(());
        }

        while self.checkpoint_history.len() > self.config.max_to_keep {
            let Some(old) = self.checkpoint_history.pop_front() else {
                break;
            };
            tracing::info!(
                path = %old.path.display(),
                step = old.global_step,
                "Removing old checkpoint"
            );

            if old.path.exists() {
                std::fs::remove_file(&old.path).map_err(|e| CheckpointError::Io {
                    path: old.path.clone(),
                    source: e,
                })?;
            }
        }

        Ok(())
    }

    fn scan(&self) -> Vec<(u64, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.config.checkpoint_dir) else {
            return Vec::new();
        };

        let mut checkpoints: Vec<(u64, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let step = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .and_then(|f| self.checkpointer.parse_step(f))?;
                Some((step, path))
            })
            .collect();
        checkpoints.sort_by_key(|(step, _)| *step);
        checkpoints
    }

    /// List all checkpoints of this format in the directory, sorted by step.
    pub fn list_checkpoints(&self) -> Vec<PathBuf> {
        self.scan().into_iter().map(|(_, path)| path).collect()
    }

    /// Whether a checkpoint is due at `step` under the configured interval.
    pub fn should_checkpoint(&self, step: u64) -> bool {
        let interval = self.config.checkpoint_interval;
        interval > 0 && step > 0 && step % interval == 0
    }

    /// Rebuild the history from the files already in the checkpoint directory.
    pub fn initialize(&mut self) -> Result<()> {
        self.checkpoint_history = self
            .scan()
            .into_iter()
            .map(|(global_step, path)| CheckpointInfo {
                path,
                global_step,
                timestamp: 0,
            })
            .collect();

        tracing::info!(
            count = self.checkpoint_history.len(),
            dir = %self.config.checkpoint_dir.display(),
            "Initialized checkpoint manager"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpointer::{BinaryCheckpointer, JsonCheckpointer};
    use tempfile::tempdir;

    #[test]
    fn test_checkpoint_config_builder() {
        let config = CheckpointConfig::new("/tmp/ckpts")
            .with_max_to_keep(10)
            .with_checkpoint_interval(500);

        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/ckpts"));
        assert_eq!(config.max_to_keep, 10);
        assert_eq!(config.checkpoint_interval, 500);

        let default = CheckpointConfig::default();
        assert_eq!(default.max_to_keep, 5);
        assert_eq!(default.checkpoint_interval, 1000);
    }

    #[test]
    fn test_checkpoint_manager_cleanup() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_max_to_keep(2);
        let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());

        for step in [100, 200, 300, 400] {
            manager.save(&ModelState::new(step)).unwrap();
        }

        assert_eq!(manager.checkpoint_count(), 2);
        assert!(!dir.path().join("checkpoint-100.json").exists());
        assert!(!dir.path().join("checkpoint-200.json").exists());
        assert!(dir.path().join("checkpoint-300.json").exists());
        assert!(dir.path().join("checkpoint-400.json").exists());
    }

    #[test]
    fn test_save_same_step_twice_tracks_once() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).with_max_to_keep(2);
        let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());

        manager.save(&ModelState::new(10)).unwrap();
        manager.save(&ModelState::new(10)).unwrap();
        assert_eq!(manager.checkpoint_count(), 1);
        assert!(dir.path().join("checkpoint-10.bin").exists());
    }

    #[test]
    fn test_checkpoint_manager_restore_latest_and_step() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path());
        let mut manager = CheckpointManager::new(config, BinaryCheckpointer::new());

        for step in [100, 500, 300] {
            manager.save(&ModelState::new(step)).unwrap();
        }

        assert_eq!(manager.restore_latest().unwrap().global_step, 500);
        assert_eq!(manager.restore_step(300).unwrap().global_step, 300);
        assert!(manager.restore_step(999).is_err());
    }

    #[test]
    fn test_restore_latest_empty_dir() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(
            CheckpointConfig::new(dir.path()),
            JsonCheckpointer::new(),
        );
        assert!(matches!(
            manager.restore_latest(),
            Err(CheckpointError::NotFound(_))
        ));
    }

    #[test]
    fn test_checkpoint_manager_should_checkpoint() {
        let config = CheckpointConfig::default().with_checkpoint_interval(100);
        let manager = CheckpointManager::new(config, JsonCheckpointer::new());

        assert!(!manager.should_checkpoint(0));
        assert!(!manager.should_checkpoint(50));
        assert!(manager.should_checkpoint(100));
        assert!(!manager.should_checkpoint(150));
        assert!(manager.should_checkpoint(200));

        let disabled = CheckpointManager::new(
            CheckpointConfig::default().with_checkpoint_interval(0),
            JsonCheckpointer::new(),
        );
        assert!(!disabled.should_checkpoint(1000));
    }

    #[test]
    fn test_list_checkpoints_ignores_other_formats() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path());
        let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());

        for step in [300, 100, 200] {
            manager.save(&ModelState::new(step)).unwrap();
        }
        std::fs::write(dir.path().join("checkpoint-900.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let checkpoints = manager.list_checkpoints();
        assert_eq!(
            checkpoints,
            vec![
                dir.path().join("checkpoint-100.json"),
                dir.path().join("checkpoint-200.json"),
                dir.path().join("checkpoint-300.json"),
            ]
        );
    }

    #[test]
    fn test_initialize_then_cleanup_uses_disk_order() {
        let dir = tempdir().unwrap();
        {
            let config = CheckpointConfig::new(dir.path()).with_max_to_keep(0);
            let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());
            for step in [100, 200, 300] {
                manager.save(&ModelState::new(step)).unwrap();
            }
        }

        let config = CheckpointConfig::new(dir.path()).with_max_to_keep(2);
        let mut manager = CheckpointManager::new(config, JsonCheckpointer::new());
        manager.initialize().unwrap();
        assert_eq!(manager.checkpoint_count(), 3);

        manager.save(&ModelState::new(400)).unwrap();
        let steps: Vec<u64> = manager.history().map(|c| c.global_step).collect();
        assert_eq!(steps, vec![300, 400]);
        assert!(!dir.path().join("checkpoint-100.json").exists());
    }
}
