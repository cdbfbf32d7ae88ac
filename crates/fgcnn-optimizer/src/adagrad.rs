//! Adagrad optimizer.
//!
//! Adagrad adapts the learning rate for each parameter based on the
//! historical sum of squared gradients.
//!
//! # Example
//!
//! ```
//! use fgcnn_optimizer::{Optimizer, Adagrad, OptimizerConfig};
//!
//! let config = OptimizerConfig::Adagrad {
//!     learning_rate: 0.01,
//!     initial_accumulator: 0.1,
//!     weight_decay: 0.0,
//! };
//! let mut adagrad = Adagrad::new(config).unwrap();
//! let mut params = vec![1.0, 2.0, 3.0];
//! adagrad.apply_gradients(&mut params, &[0.1, 0.2, 0.3]);
//! ```

use crate::{Optimizer, OptimizerConfig, OptimizerError};
use serde::{Deserialize, Serialize};

// Keeps rows that never saw a gradient from dividing zero by zero.
const EPSILON: f32 = 1e-7;

/// Adagrad optimizer with per-parameter adaptive learning rates.
///
/// ```text
/// accumulator = accumulator + gradient^2
/// param = param - learning_rate * gradient / (sqrt(accumulator) + eps)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adagrad {
    /// Learning rate for gradient updates.
    learning_rate: f32,
    /// Initial value for the accumulator.
    initial_accumulator: f32,
    /// Weight decay (L2 regularization) coefficient.
    weight_decay: f32,
    /// Accumulated squared gradients for each parameter.
    accumulator: Vec<f32>,
    /// Configuration used to create this optimizer.
    config: OptimizerConfig,
}

impl Adagrad {
    /// Returns the current accumulator state.
    pub fn accumulator(&self) -> &[f32] {
        &self.accumulator
    }

    /// Resets the accumulator state.
    pub fn reset_state(&mut self) {
        self.accumulator.clear();
    }
}

impl Optimizer for Adagrad {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        match config {
            OptimizerConfig::Adagrad {
                learning_rate,
                initial_accumulator,
                weight_decay,
            } => Ok(Self {
                learning_rate,
                initial_accumulator,
                weight_decay,
                accumulator: Vec::new(),
                config,
            }),
            _ => Err(OptimizerError::ConfigMismatch {
                expected: "Adagrad".to_string(),
                got: config.name().to_string(),
            }),
        }
    }

    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]) {
        if self.accumulator.len() != params.len() {
            self.accumulator = vec![self.initial_accumulator; params.len()];
        }

        for (i, (p, g)) in params.iter_mut().zip(gradients.iter()).enumerate() {
            let grad = *g + self.weight_decay * *p;
            self.accumulator[i] += grad * grad;
            *p -= self.learning_rate * grad / (self.accumulator[i].sqrt() + EPSILON);
        }
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}
