//! Dense + activation (+ dropout) stacks used as the deep part of the
//! prediction head.

use crate::activation::{ActivationLayer, ActivationType};
use crate::dense::Dense;
use crate::dropout::Dropout;
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Configuration for building an MLP.
///
/// # Example
///
/// ```
/// use fgcnn_layers::activation::ActivationType;
/// use fgcnn_layers::mlp::MLPConfig;
///
/// let config = MLPConfig::new(128)
///     .add_layer(64, ActivationType::Relu)
///     .add_layer(32, ActivationType::Relu)
///     .with_dropout(0.2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPConfig {
    /// Input dimension
    pub input_dim: usize,
    /// Layer configurations: (output_dim, activation)
    pub layers: Vec<(usize, ActivationType)>,
    /// Whether to use bias in dense layers
    pub use_bias: bool,
    /// Dropout rate applied after every activation (0.0 to disable)
    pub dropout_rate: f32,
    /// Kernel initializer for every dense layer
    pub kernel_initializer: Initializer,
    /// Kernel regularizer for every dense layer
    pub kernel_regularizer: Regularizer,
    /// Seed for the dropout masks
    pub seed: u64,
}

impl MLPConfig {
    /// Creates a new MLP configuration with the specified input dimension.
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            layers: Vec::new(),
            use_bias: true,
            dropout_rate: 0.0,
            kernel_initializer: Initializer::GlorotUniform,
            kernel_regularizer: Regularizer::None,
            seed: 0,
        }
    }

    /// Adds a layer to the MLP configuration.
    pub fn add_layer(mut self, output_dim: usize, activation: ActivationType) -> Self {
        self.layers.push((output_dim, activation));
        self
    }

    /// Sets whether to use bias in dense layers.
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Sets the dropout rate.
    pub fn with_dropout(mut self, rate: f32) -> Self {
        self.dropout_rate = rate;
        self
    }

    /// Sets the kernel initializer.
    pub fn with_kernel_initializer(mut self, initializer: Initializer) -> Self {
        self.kernel_initializer = initializer;
        self
    }

    /// Sets the kernel regularizer.
    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = regularizer;
        self
    }

    /// Sets the dropout seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.input_dim == 0 {
            return Err(LayerError::ConfigError {
                message: "Input dimension must be positive".to_string(),
            });
        }
        if self.layers.is_empty() {
            return Err(LayerError::ConfigError {
                message: "MLP must have at least one layer".to_string(),
            });
        }
        for (i, (dim, _)) in self.layers.iter().enumerate() {
            if *dim == 0 {
                return Err(LayerError::ConfigError {
                    message: format!("Layer {} has zero output dimension", i),
                });
            }
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(LayerError::ConfigError {
                message: "Dropout rate must be in [0, 1)".to_string(),
            });
        }
        Ok(())
    }

    /// Builds the MLP from this configuration.
    pub fn build(self, rng: &mut StdRng) -> Result<MLP, LayerError> {
        MLP::from_config(self, rng)
    }
}

/// One hidden block: dense, activation, optional dropout.
#[derive(Debug, Clone)]
struct Block {
    dense: Dense,
    activation: ActivationLayer,
    dropout: Option<Dropout>,
}

/// A stack of dense blocks.
///
/// # Example
///
/// ```
/// use fgcnn_layers::activation::ActivationType;
/// use fgcnn_layers::layer::Layer;
/// use fgcnn_layers::mlp::MLPConfig;
/// use fgcnn_layers::tensor::Tensor;
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// let mlp = MLPConfig::new(24)
///     .add_layer(16, ActivationType::Relu)
///     .add_layer(1, ActivationType::Linear)
///     .build(&mut rng)
///     .unwrap();
///
/// let output = mlp.forward(&Tensor::zeros(&[8, 24])).unwrap();
/// assert_eq!(output.shape(), &[8, 1]);
/// ```
#[derive(Debug, Clone)]
pub struct MLP {
    blocks: Vec<Block>,
    config: MLPConfig,
    training: bool,
}

impl MLP {
    /// Builds every block; block `i` seeds its dropout with `seed + i`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ConfigError`] for an invalid configuration.
    pub fn from_config(config: MLPConfig, rng: &mut StdRng) -> Result<Self, LayerError> {
        config.validate()?;

        let mut blocks = Vec::with_capacity(config.layers.len());
        let mut in_dim = config.input_dim;
        for (i, &(out_dim, activation)) in config.layers.iter().enumerate() {
            let dense = Dense::new_with_initializer(
                in_dim,
                out_dim,
                config.kernel_initializer,
                config.use_bias,
                rng,
            )?
            .with_kernel_regularizer(config.kernel_regularizer);
            let dropout = if config.dropout_rate > 0.0 {
                Some(Dropout::new(config.dropout_rate, config.seed.wrapping_add(i as u64))?)
            } else {
                None
            };
            blocks.push(Block {
                dense,
                activation: ActivationLayer::from_activation_type(activation),
                dropout,
            });
            in_dim = out_dim;
        }

        Ok(Self {
            blocks,
            config,
            training: true,
        })
    }

    /// Number of hidden blocks.
    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }

    /// Dense layer of every block, input side first.
    pub fn dense_layers(&self) -> impl Iterator<Item = &Dense> {
        self.blocks.iter().map(|b| &b.dense)
    }

    /// Mutable counterpart of [`MLP::dense_layers`].
    pub fn dense_layers_mut(&mut self) -> impl Iterator<Item = &mut Dense> {
        self.blocks.iter_mut().map(|b| &mut b.dense)
    }

    /// The configuration this stack was built from.
    pub fn config(&self) -> &MLPConfig {
        &self.config
    }

    /// Width of the last block.
    pub fn output_dim(&self) -> usize {
        self.config.layers.last().map_or(self.config.input_dim, |&(d, _)| d)
    }

    /// Forward pass that caches every block's activations.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.blocks.iter_mut().try_fold(input.clone(), |x, block| {
            let x = block.dense.forward_train(&x)?;
            let x = block.activation.forward_train(&x)?;
            match &mut block.dropout {
                Some(dropout) => dropout.forward_train(&x),
                None => Ok(x),
            }
        })
    }
}

impl Layer for MLP {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.blocks.iter().try_fold(input.clone(), |x, block| {
            block.activation.forward(&block.dense.forward(&x)?)
        })
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        self.blocks.iter_mut().rev().try_fold(grad.clone(), |g, block| {
            let g = match &mut block.dropout {
                Some(dropout) => dropout.backward(&g)?,
                None => g,
            };
            let g = block.activation.backward(&g)?;
            block.dense.backward(&g)
        })
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.dense_layers().flat_map(|d| d.parameters()).collect()
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        self.dense_layers_mut().flat_map(|d| d.parameters_mut()).collect()
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        self.dense_layers_mut().flat_map(|d| d.take_gradients()).collect()
    }

    fn regularization_loss(&self) -> f32 {
        self.dense_layers().map(|d| d.regularization_loss()).sum()
    }

    fn name(&self) -> &str {
        "MLP"
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
        for dropout in self.blocks.iter_mut().filter_map(|b| b.dropout.as_mut()) {
            dropout.set_training(training);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(1024)
    }

    #[test]
    fn test_mlp_config() {
        let config = MLPConfig::new(128)
            .add_layer(64, ActivationType::Relu)
            .add_layer(32, ActivationType::Relu)
            .add_layer(10, ActivationType::Linear);

        assert_eq!(config.input_dim, 128);
        assert_eq!(config.layers.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mlp_config_invalid() {
        let config = MLPConfig::new(0);
        assert!(config.validate().is_err());

        let config = MLPConfig::new(128);
        assert!(config.validate().is_err()); // No layers

        let config = MLPConfig::new(128).add_layer(0, ActivationType::Relu);
        assert!(config.validate().is_err()); // Zero dimension

        let config = MLPConfig::new(8)
            .add_layer(4, ActivationType::Relu)
            .with_dropout(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mlp_forward_backward() {
        let mut mlp = MLPConfig::new(10)
            .add_layer(5, ActivationType::Relu)
            .add_layer(2, ActivationType::Linear)
            .build(&mut rng())
            .unwrap();

        let input = Tensor::ones(&[3, 10]);
        let output = mlp.forward_train(&input).unwrap();
        assert_eq!(output.shape(), &[3, 2]);

        let input_grad = mlp.backward(&Tensor::ones(&[3, 2])).unwrap();
        assert_eq!(input_grad.shape(), &[3, 10]);

        let grads = mlp.take_gradients();
        assert_eq!(grads.len(), mlp.parameters().len());
        assert!(grads.iter().all(Option::is_some));
    }

    #[test]
    fn test_mlp_parameters() {
        let mlp = MLPConfig::new(10)
            .add_layer(5, ActivationType::Relu)
            .add_layer(2, ActivationType::Linear)
            .build(&mut rng())
            .unwrap();

        // 2 layers with bias: 2 * 2 = 4 parameter tensors
        assert_eq!(mlp.parameters().len(), 4);
        assert_eq!(mlp.output_dim(), 2);
    }

    #[test]
    fn test_mlp_regularization_loss() {
        let mlp = MLPConfig::new(4)
            .add_layer(3, ActivationType::Relu)
            .with_kernel_regularizer(Regularizer::L2(0.1))
            .build(&mut rng())
            .unwrap();
        let first = mlp.dense_layers().next().unwrap();
        let expected = 0.1 * first.weights().sqr().sum();
        assert!((mlp.regularization_loss() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_mlp_dropout_inactive_at_inference() {
        let mut mlp = MLPConfig::new(6)
            .add_layer(6, ActivationType::Relu)
            .with_dropout(0.5)
            .build(&mut rng())
            .unwrap();
        let input = Tensor::ones(&[2, 6]);
        let inference = mlp.forward(&input).unwrap();

        mlp.set_training(false);
        let eval_train_path = mlp.forward_train(&input).unwrap();
        assert_eq!(inference, eval_train_path);
    }

    #[test]
    fn test_dropout_masks_differ_per_block() {
        let mut mlp = MLPConfig::new(32)
            .add_layer(32, ActivationType::Linear)
            .add_layer(32, ActivationType::Linear)
            .with_kernel_initializer(Initializer::Constant(0.1))
            .with_bias(false)
            .with_dropout(0.5)
            .with_seed(3)
            .build(&mut rng())
            .unwrap();
        let out = mlp.forward_train(&Tensor::ones(&[1, 32])).unwrap();
        assert!(out.data().iter().any(|&v| v == 0.0));
        assert!(out.data().iter().any(|&v| v != 0.0));
        assert_eq!(mlp.num_layers(), 2);
        assert_eq!(mlp.output_dim(), 32);
    }
}
