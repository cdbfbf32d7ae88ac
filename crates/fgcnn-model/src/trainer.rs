//! Mini-batch training loop state.

use std::path::PathBuf;

use fgcnn_checkpoint::{CheckpointManager, Checkpointer};
use fgcnn_optimizer::{create_optimizer, OptimizerConfig, OptimizerDyn};
use serde::{Deserialize, Serialize};

use crate::batch::FeatureBatch;
use crate::error::Result;
use crate::loss::Loss;
use crate::model::FGCNN;
use crate::params::ParameterGroup;

/// Training hyperparameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Optimizer applied to every parameter tensor.
    pub optimizer: OptimizerConfig,
}

impl TrainerConfig {
    /// Sets the optimizer.
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }
}

/// Owns a model and one optimizer state per parameter tensor.
pub struct Trainer {
    model: FGCNN,
    optimizers: Vec<Box<dyn OptimizerDyn>>,
    loss: Loss,
    global_step: u64,
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("loss", &self.loss)
            .field("optimizers", &self.optimizers.len())
            .field("global_step", &self.global_step)
            .finish()
    }
}

impl Trainer {
    /// Creates a trainer; the loss follows the model's output activation.
    pub fn new(model: FGCNN, config: &TrainerConfig) -> Result<Self> {
        let optimizers = model
            .named_parameters()
            .iter()
            .map(|_| create_optimizer(config.optimizer.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let loss = Loss::for_activation(model.config().final_activation);
        tracing::info!(
            optimizer = config.optimizer.name(),
            learning_rate = config.optimizer.learning_rate(),
            tensors = optimizers.len(),
            ?loss,
            "Created trainer"
        );
        Ok(Self {
            model,
            optimizers,
            loss,
            global_step: 0,
        })
    }

    /// Resumes step counting from `global_step`.
    pub fn with_global_step(mut self, global_step: u64) -> Self {
        self.global_step = global_step;
        self
    }

    /// One optimization step. Returns data loss plus regularization loss,
    /// measured before the update.
    pub fn train_on_batch(&mut self, batch: &FeatureBatch, labels: &[f32]) -> Result<f32> {
        self.model.set_training(true);
        let predictions = self.model.forward_train(batch)?;
        let (data_loss, grad) = self.loss.compute(&predictions, labels)?;
        self.model.backward(&grad)?;
        let reg_loss = self.model.regularization_loss();

        let gradients = self.model.take_gradients();
        let params = self.model.named_parameters_mut();
        for ((optimizer, (_, param)), grad) in self.optimizers.iter_mut().zip(params).zip(gradients) {
            if let Some(grad) = grad {
                optimizer.apply_gradients(param.data_mut(), grad.data());
            }
        }

        self.global_step += 1;
        tracing::debug!(step = self.global_step, data_loss, reg_loss, "Train step");
        Ok(data_loss + reg_loss)
    }

    /// Loss on a batch without updating anything.
    pub fn evaluate(&mut self, batch: &FeatureBatch, labels: &[f32]) -> Result<f32> {
        self.model.set_training(false);
        let predictions = self.model.predict(batch)?;
        let (data_loss, _) = self.loss.compute(&predictions, labels)?;
        Ok(data_loss + self.model.regularization_loss())
    }

    /// Saves the model at the current step through `manager`.
    pub fn save_checkpoint<C: Checkpointer>(&self, manager: &mut CheckpointManager<C>) -> Result<PathBuf> {
        let state = self.model.state_dict(self.global_step)?;
        Ok(manager.save(&state)?.path)
    }

    /// Number of completed steps.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Loss in use.
    pub fn loss(&self) -> Loss {
        self.loss
    }

    /// The model being trained.
    pub fn model(&self) -> &FGCNN {
        &self.model
    }

    /// Mutable access to the model.
    pub fn model_mut(&mut self) -> &mut FGCNN {
        &mut self.model
    }

    /// Gives the model back.
    pub fn into_model(self) -> FGCNN {
        self.model
    }
}
