//! Plain stochastic gradient descent.

use crate::{Optimizer, OptimizerConfig, OptimizerError};

/// `param -= learning_rate * grad`, no state.
#[derive(Debug, Clone)]
pub struct Sgd {
    config: OptimizerConfig,
    learning_rate: f32,
}

impl Optimizer for Sgd {
    fn new(config: OptimizerConfig) -> Result<Self, OptimizerError> {
        let OptimizerConfig::Sgd { learning_rate } = config else {
            return Err(OptimizerError::ConfigMismatch {
                expected: "Sgd".to_string(),
                got: config.name().to_string(),
            });
        };
        Ok(Self {
            config,
            learning_rate,
        })
    }

    fn apply_gradients(&mut self, params: &mut [f32], gradients: &[f32]) {
        let lr = self.learning_rate;
        params
            .iter_mut()
            .zip(gradients)
            .for_each(|(p, g)| *p -= lr * g);
    }

    fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}
