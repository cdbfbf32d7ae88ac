//! Weight initialization utilities matching Keras defaults.
//!
//! Every initializer draws from a caller-owned [`StdRng`] so that a model
//! built twice from the same seed produces identical parameters.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::tensor::Tensor;

// Standard deviation of a unit normal truncated to [-2, 2].
const TRUNCATED_NORMAL_STD: f32 = 0.879_625_66;

/// Weight initializers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Initializer {
    /// Glorot/Xavier uniform initialization.
    #[default]
    GlorotUniform,
    /// Glorot/Xavier normal initialization (truncated at two standard deviations).
    GlorotNormal,
    /// All zeros.
    Zeros,
    /// Constant value.
    Constant(f32),
    /// Untruncated normal distribution.
    RandomNormal {
        /// Mean of the distribution
        mean: f32,
        /// Standard deviation of the distribution
        std: f32,
    },
}

impl Initializer {
    /// Creates a tensor of `shape` filled according to this initializer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InitializationError`] for a negative or
    /// non-finite standard deviation.
    pub fn initialize(&self, shape: &[usize], rng: &mut StdRng) -> Result<Tensor, LayerError> {
        match *self {
            Initializer::Zeros => Ok(Tensor::zeros(shape)),
            Initializer::Constant(value) => Ok(Tensor::full(shape, value)),
            Initializer::RandomNormal { mean, std } => normal(shape, mean, std, rng),
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = compute_fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1.0)).sqrt();
                let numel: usize = shape.iter().product();
                let data = (0..numel).map(|_| rng.gen_range(-limit..=limit)).collect();
                Ok(Tensor::from_data(shape, data))
            }
            Initializer::GlorotNormal => {
                let (fan_in, fan_out) = compute_fans(shape);
                let std = (2.0 / (fan_in + fan_out).max(1.0)).sqrt() / TRUNCATED_NORMAL_STD;
                truncated_normal(shape, std, rng)
            }
        }
    }
}

fn normal_distribution(mean: f32, std: f32) -> Result<Normal<f32>, LayerError> {
    // rand_distr accepts a negative std and samples with its magnitude.
    if !(std.is_finite() && std >= 0.0) {
        return Err(LayerError::InitializationError {
            message: format!("standard deviation must be finite and non-negative, got {std}"),
        });
    }
    Normal::new(mean, std).map_err(|e| LayerError::InitializationError {
        message: format!("invalid normal distribution (mean={mean}, std={std}): {e}"),
    })
}

fn normal(shape: &[usize], mean: f32, std: f32, rng: &mut StdRng) -> Result<Tensor, LayerError> {
    let dist = normal_distribution(mean, std)?;
    let numel: usize = shape.iter().product();
    let data = (0..numel).map(|_| dist.sample(rng)).collect();
    Ok(Tensor::from_data(shape, data))
}

fn truncated_normal(shape: &[usize], std: f32, rng: &mut StdRng) -> Result<Tensor, LayerError> {
    let dist = normal_distribution(0.0, 1.0)?;
    let numel: usize = shape.iter().product();
    let mut data = Vec::with_capacity(numel);
    while data.len() < numel {
        let z: f32 = dist.sample(rng);
        if z.abs() <= 2.0 {
            data.push(z * std);
        }
    }
    Ok(Tensor::from_data(shape, data))
}

/// Computes `(fan_in, fan_out)` for a kernel shape.
///
/// Convolution kernels use the channels-last receptive field
/// `prod(shape[..rank - 2])`.
pub fn compute_fans(shape: &[usize]) -> (f32, f32) {
    match shape.len() {
        0 => (1.0, 1.0),
        1 => (shape[0] as f32, shape[0] as f32),
        2 => (shape[0] as f32, shape[1] as f32),
        rank => {
            let receptive: usize = shape[..rank - 2].iter().product();
            let fan_in = shape[rank - 2] as f32 * receptive as f32;
            let fan_out = shape[rank - 1] as f32 * receptive as f32;
            (fan_in, fan_out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_compute_fans_conv_kernel() {
        // [kh, kw, c_in, c_out]
        let (fan_in, fan_out) = compute_fans(&[6, 1, 1, 4]);
        assert_eq!(fan_in, 6.0);
        assert_eq!(fan_out, 24.0);
    }

    #[test]
    fn test_glorot_uniform_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let t = Initializer::GlorotUniform
            .initialize(&[10, 20], &mut rng)
            .unwrap();
        let limit = (6.0f32 / 30.0).sqrt();
        assert!(t.data().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_glorot_normal_truncated() {
        let mut rng = StdRng::seed_from_u64(0);
        let t = Initializer::GlorotNormal
            .initialize(&[16, 16], &mut rng)
            .unwrap();
        let std = (2.0f32 / 32.0).sqrt() / TRUNCATED_NORMAL_STD;
        assert!(t.data().iter().all(|v| v.abs() <= 2.0 * std + 1e-6));
    }

    #[test]
    fn test_same_seed_same_values() {
        let init = Initializer::RandomNormal {
            mean: 0.0,
            std: 1e-4,
        };
        let a = init
            .initialize(&[5, 3], &mut StdRng::seed_from_u64(1024))
            .unwrap();
        let b = init
            .initialize(&[5, 3], &mut StdRng::seed_from_u64(1024))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_negative_std_is_error() {
        let init = Initializer::RandomNormal {
            mean: 0.0,
            std: -1.0,
        };
        let result = init.initialize(&[2], &mut StdRng::seed_from_u64(0));
        assert!(matches!(
            result,
            Err(LayerError::InitializationError { .. })
        ));

        let init = Initializer::RandomNormal {
            mean: 0.0,
            std: f32::NAN,
        };
        assert!(init.initialize(&[2], &mut StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_constant_and_zeros() {
        let mut rng = StdRng::seed_from_u64(0);
        let c = Initializer::Constant(0.5)
            .initialize(&[3], &mut rng)
            .unwrap();
        assert_eq!(c.data(), &[0.5, 0.5, 0.5]);
        let z = Initializer::Zeros.initialize(&[2, 2], &mut rng).unwrap();
        assert_eq!(z.sum(), 0.0);
    }
}
