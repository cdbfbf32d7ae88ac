//! Parameter optimizers for FGCNN training.
//!
//! This crate provides the optimization algorithms used to update dense
//! parameter tensors. Each optimizer implements the [`Optimizer`] trait and
//! keeps per-element state for exactly one parameter tensor, so a model with
//! `n` parameter tensors owns `n` optimizer instances.
//!
//! # Available Optimizers
//!
//! - [`Sgd`] - Stochastic Gradient Descent
//! - [`Adagrad`] - Adaptive Gradient Algorithm
//! - [`Adam`] - Adaptive Moment Estimation
//!
//! # Example
//!
//! ```
//! use fgcnn_optimizer::{Optimizer, Sgd, OptimizerConfig};
//!
//! let config = OptimizerConfig::Sgd { learning_rate: 0.01 };
//! let mut optimizer = Sgd::new(config).unwrap();
//!
//! let mut weights = vec![1.0, 2.0, 3.0];
//! let gradients = vec![0.1, 0.2, 0.3];
//!
//! optimizer.apply_gradients(&mut weights, &gradients);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod adagrad;
mod adam;
mod sgd;

pub use adagrad::Adagrad;
pub use adam::Adam;
pub use sgd::Sgd;

/// Errors that can occur when working with optimizers.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Configuration type does not match the optimizer type.
    #[error("Config mismatch: expected {expected}, got {got}")]
    ConfigMismatch {
        /// Optimizer that was being constructed
        expected: String,
        /// Variant that was supplied
        got: String,
    },

    /// Invalid configuration parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Configuration for different optimizer types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizerConfig {
    /// Stochastic Gradient Descent configuration.
    Sgd {
        /// Learning rate for gradient updates.
        learning_rate: f32,
    },

    /// Adagrad configuration.
    Adagrad {
        /// Learning rate for gradient updates.
        learning_rate: f32,
        /// Initial value for the accumulator.
        initial_accumulator: f32,
        /// Weight decay (L2 regularization) coefficient.
        weight_decay: f32,
    },

    /// Adam configuration.
    Adam {
        /// Learning rate for gradient updates.
        learning_rate: f32,
        /// Exponential decay rate for first moment estimates.
        beta1: f32,
        /// Exponential decay rate for second moment estimates.
        beta2: f32,
        /// Small constant for numerical stability.
        epsilon: f32,
    },
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam {
            learning_rate: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
        }
    }
}

impl OptimizerConfig {
    /// Returns the name of the optimizer type.
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerConfig::Sgd { .. } => "Sgd",
            OptimizerConfig::Adagrad { .. } => "Adagrad",
            OptimizerConfig::Adam { .. } => "Adam",
        }
    }

    /// Returns the learning rate for the optimizer.
    pub fn learning_rate(&self) -> f32 {
        match self {
            OptimizerConfig::Sgd { learning_rate } => *learning_rate,
            OptimizerConfig::Adagrad { learning_rate, .. } => *learning_rate,
            OptimizerConfig::Adam { learning_rate, .. } => *learning_rate,
        }
    }

    /// Same optimizer with a different learning rate.
    pub fn with_learning_rate(mut self, lr: f32) -> Self {
        match &mut self {
            OptimizerConfig::Sgd { learning_rate }
            | OptimizerConfig::Adagrad { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. } => *learning_rate = lr,
        }
        self
    }

    /// Checks that every hyperparameter is in range.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::InvalidParameter`] naming the offending value.
    pub fn validate(&self) -> Result<(), OptimizerError> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(OptimizerError::InvalidParameter(format!(
                "learning_rate must be positive, got {lr}"
            )));
        }
        match *self {
            OptimizerConfig::Sgd { .. } => Ok(()),
            OptimizerConfig::Adagrad {
                initial_accumulator,
                weight_decay,
                ..
            } => {
                if initial_accumulator < 0.0 {
                    return Err(OptimizerError::InvalidParameter(format!(
                        "initial_accumulator must be non-negative, got {initial_accumulator}"
                    )));
                }
                if weight_decay < 0.0 {
                    return Err(OptimizerError::InvalidParameter(format!(
                        "weight_decay must be non-negative, got {weight_decay}"
                    )));
                }
                Ok(())
            }
            OptimizerConfig::Adam {
                beta1,
                beta2,
                epsilon,
                ..
            } => {
                for (name, beta) in [("beta1", beta1), ("beta2", beta2)] {
                    if !(0.0..1.0).contains(&beta) {
                        return Err(OptimizerError::InvalidParameter(format!(
                            "{name} must be in [0, 1), got {beta}"
                        )));
                    }
                }
                if epsilon <= 0.0 {
                    return Err(OptimizerError::InvalidParameter(format!(
                        "epsilon must be positive, got {epsilon}"
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Trait for parameter optimizers.
///
/// Optimizers are responsible for updating a flat parameter buffer based on
/// computed gradients.
pub trait Optimizer: Sized {
    /// Creates a new optimizer from the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::ConfigMismatch`] if the configuration type
    /// does not match the optimizer type.
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError>;

    /// Applies gradients to update the parameters in place.
    ///
    /// # Panics
    ///
    /// May panic if `params` and `gradients` have different lengths.
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]);

    /// Returns a reference to the optimizer's configuration.
    fn config(&self) -> &OptimizerConfig;
}

/// Creates an optimizer from the given configuration.
///
/// # Example
///
/// ```
/// use fgcnn_optimizer::{create_optimizer, OptimizerConfig};
///
/// let config = OptimizerConfig::Adam {
///     learning_rate: 0.001,
///     beta1: 0.9,
///     beta2: 0.999,
///     epsilon: 1e-8,
/// };
///
/// let optimizer = create_optimizer(config).unwrap();
/// assert_eq!(optimizer.config().name(), "Adam");
/// ```
pub fn create_optimizer(config: OptimizerConfig) -> Result<Box<dyn OptimizerDyn>, OptimizerError> {
    config.validate()?;
    Ok(match &config {
        OptimizerConfig::Sgd { .. } => Box::new(Sgd::new(config)?),
        OptimizerConfig::Adagrad { .. } => Box::new(Adagrad::new(config)?),
        OptimizerConfig::Adam { .. } => Box::new(Adam::new(config)?),
    })
}

/// Dynamic dispatch version of the Optimizer trait.
pub trait OptimizerDyn: Send + Sync {
    /// Applies gradients to update the parameters in place.
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]);

    /// Returns a reference to the optimizer's configuration.
    fn config(&self) -> &OptimizerConfig;
}

impl<T: Optimizer + Send + Sync> OptimizerDyn for T {
    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]) {
        Optimizer::apply_gradients(self, params, gradients)
    }

    fn config(&self) -> &OptimizerConfig {
        Optimizer::config(self)
    }
}
