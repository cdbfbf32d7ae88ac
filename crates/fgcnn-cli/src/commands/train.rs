//! Train Command Implementation
//!
//! Fits an FGCNN model on the synthetic click stream and keeps the most
//! recent checkpoints in the model directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fgcnn_checkpoint::{
    BinaryCheckpointer, CheckpointConfig, CheckpointManager, Checkpointer, JsonCheckpointer,
};
use fgcnn_model::{build_fgcnn, ParameterGroup, Trainer, FGCNN};
use tracing::{info, warn};

use crate::run_config::RunConfig;
use crate::synthetic::SyntheticClicks;
use crate::CheckpointFormat;

/// Train a model and write checkpoints
///
/// # Example
///
/// ```bash
/// fgcnn train \
///     --model-dir /path/to/model \
///     --config /path/to/run.json \
///     --train-steps 1000
/// ```
#[derive(Args, Debug, Clone)]
pub struct TrainCommand {
    /// Directory to save model checkpoints
    #[arg(long, short = 'd', env = "FGCNN_MODEL_DIR")]
    pub model_dir: PathBuf,

    /// Path to the run configuration file (JSON format)
    #[arg(long = "config", short = 'c', env = "FGCNN_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,

    /// Number of training steps to run
    #[arg(long, short = 's', visible_alias = "steps", default_value = "1000")]
    pub train_steps: u64,

    /// Examples per step
    #[arg(long, short = 'b', default_value = "64")]
    pub batch_size: usize,

    /// Overrides the learning rate of the configured optimizer
    #[arg(long)]
    pub learning_rate: Option<f32>,

    /// Checkpoint save interval (in steps)
    #[arg(long, default_value = "500")]
    pub save_steps: u64,

    /// Evaluation interval (in steps)
    #[arg(long, default_value = "100")]
    pub eval_steps: u64,

    /// Number of checkpoints to keep
    #[arg(long, default_value = "5")]
    pub max_to_keep: usize,

    /// Resume training from the latest checkpoint
    #[arg(long, default_value = "false")]
    pub resume: bool,

    /// Seed of the synthetic click stream
    #[arg(long, default_value = "42")]
    pub data_seed: u64,

    /// Checkpoint encoding
    #[arg(long, value_enum, default_value = "json")]
    pub format: CheckpointFormat,
}

/// Outcome of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Step reached
    pub global_step: u64,
    /// Training loss of the last step
    pub final_loss: f32,
    /// Loss on the held-out batch after training
    pub eval_loss: f32,
    /// Last checkpoint written
    pub checkpoint: PathBuf,
}

impl TrainCommand {
    /// Execute the train command
    pub fn run(&self) -> Result<TrainReport> {
        info!("Starting training...");
        info!("Model directory: {:?}", self.model_dir);
        info!("Training steps: {}", self.train_steps);

        match self.format {
            CheckpointFormat::Json => self.run_with(JsonCheckpointer::new()),
            CheckpointFormat::Binary => self.run_with(BinaryCheckpointer::new()),
        }
    }

    fn run_with<C: Checkpointer>(&self, checkpointer: C) -> Result<TrainReport> {
        if !self.model_dir.exists() {
            std::fs::create_dir_all(&self.model_dir).with_context(|| {
                format!("Failed to create model directory {}", self.model_dir.display())
            })?;
            info!("Created model directory: {:?}", self.model_dir);
        }

        let mut run = RunConfig::load(self.config_path.as_deref())?;
        if let Some(lr) = self.learning_rate {
            run.trainer.optimizer = run.trainer.optimizer.with_learning_rate(lr);
        }

        let mut manager = CheckpointManager::new(
            CheckpointConfig::new(&self.model_dir)
                .with_max_to_keep(self.max_to_keep)
                .with_checkpoint_interval(self.save_steps),
            checkpointer,
        );
        manager.initialize()?;

        let (model, start_step) = if self.resume && manager.checkpoint_count() > 0 {
            let state = manager.restore_latest()?;
            let model =
                FGCNN::from_state(&state).context("Failed to rebuild model from checkpoint")?;
            if model.feature_spec() != &run.features || model.config() != &run.model {
                warn!("Checkpoint architecture differs from the config file; using the checkpoint");
            }
            info!(step = state.global_step, "Resuming from checkpoint");
            (model, state.global_step)
        } else {
            if self.resume {
                warn!("No checkpoint found in {:?}, starting from scratch", self.model_dir);
            }
            (build_fgcnn(&run.features, &run.model)?, 0)
        };
        info!(parameters = model.num_parameters(), "Model ready");

        let mut trainer = Trainer::new(model, &run.trainer)?.with_global_step(start_step);
        let mut clicks = SyntheticClicks::new(trainer.model().feature_spec(), self.data_seed);
        let (eval_batch, eval_labels) = clicks.next_batch(self.batch_size)?;
        // One training batch per completed step.
        clicks.skip(start_step, self.batch_size)?;

        let mut final_loss = f32::NAN;
        let mut checkpoint = None;
        for _ in 0..self.train_steps {
            let (batch, labels) = clicks.next_batch(self.batch_size)?;
            final_loss = trainer.train_on_batch(&batch, &labels)?;
            let step = trainer.global_step();

            if self.eval_steps > 0 && step % self.eval_steps == 0 {
                let eval_loss = trainer.evaluate(&eval_batch, &eval_labels)?;
                info!(step, loss = final_loss, eval_loss, "Evaluation");
            }
            if manager.should_checkpoint(step) {
                checkpoint = Some(trainer.save_checkpoint(&mut manager)?);
            }
        }

        // Always leave a checkpoint at the final step.
        let checkpoint = match checkpoint {
            Some(path) if manager.should_checkpoint(trainer.global_step()) => path,
            _ => trainer.save_checkpoint(&mut manager)?,
        };
        let eval_loss = trainer.evaluate(&eval_batch, &eval_labels)?;

        info!(
            global_step = trainer.global_step(),
            final_loss,
            eval_loss,
            checkpoint = %checkpoint.display(),
            "Training completed successfully"
        );
        Ok(TrainReport {
            global_step: trainer.global_step(),
            final_loss,
            eval_loss,
            checkpoint,
        })
    }
}
