//! Predict Command Implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fgcnn_model::{FeatureBatch, FGCNN};
use serde_json::json;
use tracing::info;

use crate::CheckpointFormat;

/// Score a batch with the latest checkpoint
///
/// The input file uses the batch JSON format:
///
/// ```json
/// {"sparse": {"user": [3, 7]}, "dense": {"price": [0.5, 1.2]}, "sequence": {"clicked_items": [[1, 4], []]}}
/// ```
///
/// Scores are written to stdout as `{"step": N, "scores": [...]}`.
#[derive(Args, Debug, Clone)]
pub struct PredictCommand {
    /// Directory holding the model checkpoints
    #[arg(long, short = 'd', env = "FGCNN_MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Path to the batch file (JSON format)
    #[arg(long, short = 'i', visible_alias = "batch")]
    pub input: PathBuf,

    /// Checkpoint encoding
    #[arg(long, value_enum, default_value = "json")]
    pub format: CheckpointFormat,
}

impl PredictCommand {
    /// Execute the predict command
    pub fn run(&self) -> Result<()> {
        let (step, scores) = self.scores()?;
        println!("{}", json!({ "step": step, "scores": scores }));
        Ok(())
    }

    /// Loads the latest checkpoint and scores the input batch.
    ///
    /// Returns the checkpoint step and one score per example.
    pub fn scores(&self) -> Result<(u64, Vec<f32>)> {
        let checkpointer = self.format.checkpointer();
        let path = checkpointer.latest(&self.model_dir).with_context(|| {
            format!("No checkpoint found in {}", self.model_dir.display())
        })?;
        let step = path
            .file_name()
            .and_then(|f| f.to_str())
            .and_then(|f| checkpointer.parse_step(f))
            .unwrap_or_default();
        info!("Loading model from: {:?}", path);
        let model = FGCNN::load(checkpointer.as_ref(), &path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let text = std::fs::read_to_string(&self.input)
            .with_context(|| format!("Failed to read batch file {}", self.input.display()))?;
        let batch = FeatureBatch::from_json_str(&text, model.feature_spec())?;
        let scores = model.predict(&batch)?;
        info!(examples = batch.batch_size(), step, "Scored batch");
        Ok((step, scores.data().to_vec()))
    }
}
