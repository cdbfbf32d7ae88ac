//! Inverted dropout.
//!
//! During training each element is zeroed with probability `rate` and the
//! survivors are scaled by `1 / (1 - rate)`; inference is the identity.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Dropout layer with its own seeded random source.
#[derive(Debug, Clone)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,
    mask: Option<Tensor>,
    training: bool,
}

impl Dropout {
    /// Creates a dropout layer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ConfigError`] if `rate` is outside `[0, 1)`.
    pub fn new(rate: f32, seed: u64) -> Result<Self, LayerError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(LayerError::ConfigError {
                message: format!("Dropout rate must be in [0, 1), got {rate}"),
            });
        }
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
            training: true,
        })
    }

    /// Drop probability.
    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Samples a fresh mask when training and applies it.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        if !self.training || self.rate == 0.0 {
            self.mask = Some(Tensor::ones(input.shape()));
            return Ok(input.clone());
        }

        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mask: Vec<f32> = (0..input.numel())
            .map(|_| {
                if self.rng.gen::<f32>() < keep {
                    scale
                } else {
                    0.0
                }
            })
            .collect();
        let mask = Tensor::from_data(input.shape(), mask);
        let output = input.mul(&mask);
        self.mask = Some(mask);
        Ok(output)
    }
}

impl Layer for Dropout {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.clone())
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let mask = self.mask.as_ref().ok_or(LayerError::NotInitialized)?;
        if mask.shape() != grad.shape() {
            return Err(LayerError::ShapeMismatch {
                expected: mask.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }
        Ok(grad.mul(mask))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Dropout"
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_rate() {
        assert!(Dropout::new(1.0, 0).is_err());
        assert!(Dropout::new(-0.1, 0).is_err());
    }

    #[test]
    fn test_inference_is_identity() {
        let dropout = Dropout::new(0.5, 0).unwrap();
        let input = Tensor::ones(&[4, 4]);
        assert_eq!(dropout.forward(&input).unwrap(), input);
    }

    #[test]
    fn test_training_mask_and_scaling() {
        let mut dropout = Dropout::new(0.5, 7).unwrap();
        let input = Tensor::ones(&[10, 10]);
        let output = dropout.forward_train(&input).unwrap();
        assert!(output.data().iter().all(|&v| v == 0.0 || v == 2.0));
        assert!(output.data().iter().any(|&v| v == 0.0));

        let grad = dropout.backward(&Tensor::ones(&[10, 10])).unwrap();
        assert_eq!(grad, output);
    }

    #[test]
    fn test_eval_mode_passes_through() {
        let mut dropout = Dropout::new(0.9, 1).unwrap();
        dropout.set_training(false);
        let input = Tensor::ones(&[2, 3]);
        assert_eq!(dropout.forward_train(&input).unwrap(), input);
    }

    #[test]
    fn test_same_seed_same_mask() {
        let input = Tensor::ones(&[8, 8]);
        let a = Dropout::new(0.3, 11).unwrap().forward_train(&input).unwrap();
        let b = Dropout::new(0.3, 11).unwrap().forward_train(&input).unwrap();
        assert_eq!(a, b);
    }
}
