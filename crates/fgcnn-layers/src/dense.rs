//! Dense (fully connected) layer implementation.
//!
//! This module provides the [`Dense`] layer, which performs a linear transformation
//! `y = xW + b` where W is the weight matrix and b is the bias vector.

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// A dense (fully connected) neural network layer.
///
/// Performs the transformation `y = xW + b` where:
/// - `x` is the input tensor of shape `[batch_size, in_features]`
/// - `W` is the weight matrix of shape `[in_features, out_features]`
/// - `b` is the bias vector of shape `[out_features]`
/// - `y` is the output tensor of shape `[batch_size, out_features]`
///
/// Inputs of higher rank are treated as a batch of rows over the last axis.
///
/// # Example
///
/// ```
/// use fgcnn_layers::dense::Dense;
/// use fgcnn_layers::layer::Layer;
/// use fgcnn_layers::tensor::Tensor;
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// let layer = Dense::new(128, 64, &mut rng).unwrap();
/// let input = Tensor::zeros(&[32, 128]); // batch of 32
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[32, 64]);
/// ```
#[derive(Debug, Clone)]
pub struct Dense {
    /// Weight matrix of shape [in_features, out_features]
    weights: Tensor,
    /// Bias vector of shape [out_features]
    bias: Tensor,
    /// Kernel regularizer
    kernel_regularizer: Regularizer,
    /// Gradient of weights
    weights_grad: Option<Tensor>,
    /// Gradient of bias
    bias_grad: Option<Tensor>,
    /// Cached input for backward pass
    cached_input: Option<Tensor>,
    /// Input feature dimension
    in_features: usize,
    /// Output feature dimension
    out_features: usize,
    /// Whether to use bias
    use_bias: bool,
}

impl Dense {
    /// Creates a new dense layer with Glorot uniform weights and zero bias.
    ///
    /// # Errors
    ///
    /// Returns an error if either dimension is zero.
    pub fn new(in_features: usize, out_features: usize, rng: &mut StdRng) -> Result<Self, LayerError> {
        Self::new_with_initializer(in_features, out_features, Initializer::GlorotUniform, true, rng)
    }

    /// Creates a new dense layer without bias.
    pub fn new_no_bias(
        in_features: usize,
        out_features: usize,
        rng: &mut StdRng,
    ) -> Result<Self, LayerError> {
        Self::new_with_initializer(in_features, out_features, Initializer::GlorotUniform, false, rng)
    }

    /// Creates a new dense layer with a custom kernel initializer.
    ///
    /// # Arguments
    ///
    /// * `in_features` - Number of input features
    /// * `out_features` - Number of output features
    /// * `kernel_initializer` - Initializer for the weight matrix
    /// * `use_bias` - Whether to add a (zero-initialized) bias
    /// * `rng` - Random source for the weight matrix
    pub fn new_with_initializer(
        in_features: usize,
        out_features: usize,
        kernel_initializer: Initializer,
        use_bias: bool,
        rng: &mut StdRng,
    ) -> Result<Self, LayerError> {
        if in_features == 0 || out_features == 0 {
            return Err(LayerError::ConfigError {
                message: format!(
                    "Dense dimensions must be positive, got {in_features} -> {out_features}"
                ),
            });
        }
        let weights = kernel_initializer.initialize(&[in_features, out_features], rng)?;
        Ok(Self {
            weights,
            bias: Tensor::zeros(&[out_features]),
            kernel_regularizer: Regularizer::None,
            weights_grad: None,
            bias_grad: None,
            cached_input: None,
            in_features,
            out_features,
            use_bias,
        })
    }

    /// Sets the kernel regularizer.
    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = regularizer;
        self
    }

    /// Returns the input feature dimension.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Returns the output feature dimension.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Returns a reference to the weights tensor.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    /// Returns a mutable reference to the weights tensor.
    pub fn weights_mut(&mut self) -> &mut Tensor {
        &mut self.weights
    }

    /// Returns a reference to the bias tensor.
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Returns whether this layer uses bias.
    pub fn has_bias(&self) -> bool {
        self.use_bias
    }

    /// Returns the weight gradients if available.
    pub fn weights_grad(&self) -> Option<&Tensor> {
        self.weights_grad.as_ref()
    }

    /// Returns the bias gradients if available.
    pub fn bias_grad(&self) -> Option<&Tensor> {
        self.bias_grad.as_ref()
    }

    /// Performs forward pass and caches input for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }

    /// Clears the cached input and gradients.
    pub fn clear_cache(&mut self) {
        self.cached_input = None;
        self.weights_grad = None;
        self.bias_grad = None;
    }

    fn last_dim(t: &Tensor) -> Result<usize, LayerError> {
        if t.ndim() < 2 {
            return Err(LayerError::ForwardError {
                message: format!("Expected >=2D tensor, got {}D", t.ndim()),
            });
        }
        Ok(t.shape()[t.ndim() - 1])
    }
}

impl Layer for Dense {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let in_dim = Self::last_dim(input)?;
        if in_dim != self.in_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.in_features,
                actual: in_dim,
            });
        }

        let rows = input.numel() / in_dim;
        let mut output = input.reshape(&[rows, in_dim]).matmul(&self.weights);
        if self.use_bias {
            output = output.add(&self.bias);
        }
        let mut out_shape = input.shape().to_vec();
        let last = out_shape.len() - 1;
        out_shape[last] = self.out_features;
        Ok(output.reshape(&out_shape))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        let out_dim = Self::last_dim(grad)?;
        if out_dim != self.out_features {
            return Err(LayerError::InvalidInputDimension {
                expected: self.out_features,
                actual: out_dim,
            });
        }

        let rows = input.numel() / self.in_features;
        let input_2d = input.reshape(&[rows, self.in_features]);
        let grad_2d = grad.reshape(&[rows, out_dim]);

        // dL/dW = x^T @ dL/dy
        let mut weights_grad = input_2d.transpose().matmul(&grad_2d);
        self.kernel_regularizer
            .accumulate_grad(&self.weights, &mut weights_grad);
        self.weights_grad = Some(weights_grad);

        if self.use_bias {
            self.bias_grad = Some(grad_2d.sum_axis(0));
        }

        // dL/dx = dL/dy @ W^T
        let input_grad = grad_2d.matmul(&self.weights.transpose());
        Ok(input_grad.reshape(input.shape()))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        if self.use_bias {
            vec![&self.weights, &self.bias]
        } else {
            vec![&self.weights]
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        if self.use_bias {
            vec![&mut self.weights, &mut self.bias]
        } else {
            vec![&mut self.weights]
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        if self.use_bias {
            vec!["kernel", "bias"]
        } else {
            vec!["kernel"]
        }
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        if self.use_bias {
            vec![self.weights_grad.take(), self.bias_grad.take()]
        } else {
            vec![self.weights_grad.take()]
        }
    }

    fn regularization_loss(&self) -> f32 {
        self.kernel_regularizer.loss(&self.weights)
    }

    fn name(&self) -> &str {
        "Dense"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_dense_forward_shape() {
        let layer = Dense::new(10, 5, &mut rng()).unwrap();
        let input = Tensor::ones(&[3, 10]);
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[3, 5]);
    }

    #[test]
    fn test_dense_forward_3d_input() {
        let layer = Dense::new(4, 2, &mut rng()).unwrap();
        let input = Tensor::ones(&[2, 3, 4]);
        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[2, 3, 2]);
    }

    #[test]
    fn test_dense_invalid_input() {
        let layer = Dense::new(10, 5, &mut rng()).unwrap();
        let input = Tensor::ones(&[3, 8]);
        assert!(matches!(
            layer.forward(&input),
            Err(LayerError::InvalidInputDimension {
                expected: 10,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_dense_zero_dim_rejected() {
        assert!(Dense::new(0, 5, &mut rng()).is_err());
    }

    #[test]
    fn test_dense_backward() {
        let mut layer = Dense::new(3, 2, &mut rng()).unwrap();
        let input = Tensor::from_data(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        layer.forward_train(&input).unwrap();

        let grad = Tensor::ones(&[2, 2]);
        let input_grad = layer.backward(&grad).unwrap();
        assert_eq!(input_grad.shape(), &[2, 3]);

        // dW[i][j] = sum_b x[b][i]
        let wg = layer.weights_grad().unwrap();
        assert_eq!(wg.data(), &[5.0, 5.0, 7.0, 7.0, 9.0, 9.0]);
        assert_eq!(layer.bias_grad().unwrap().data(), &[2.0, 2.0]);

        // dX[b][i] = sum_j W[i][j]
        let w = layer.weights().data().to_vec();
        assert_relative_eq!(input_grad.data()[0], w[0] + w[1], epsilon = 1e-6);
    }

    #[test]
    fn test_dense_backward_requires_forward_train() {
        let mut layer = Dense::new(3, 2, &mut rng()).unwrap();
        assert!(matches!(
            layer.backward(&Tensor::ones(&[1, 2])),
            Err(LayerError::NotInitialized)
        ));
    }

    #[test]
    fn test_dense_regularizer_gradient() {
        let mut layer = Dense::new_no_bias(2, 1, &mut rng())
            .unwrap()
            .with_kernel_regularizer(Regularizer::L2(0.5));
        let w = layer.weights().clone();
        layer.forward_train(&Tensor::zeros(&[1, 2])).unwrap();
        layer.backward(&Tensor::ones(&[1, 1])).unwrap();
        // Zero input: only the regularizer contributes (2 * 0.5 * w).
        assert_eq!(layer.weights_grad().unwrap(), &w);
        assert_relative_eq!(layer.regularization_loss(), 0.5 * w.sqr().sum());
    }

    #[test]
    fn test_dense_no_bias_parameters() {
        let mut layer = Dense::new_no_bias(4, 1, &mut rng()).unwrap();
        assert_eq!(layer.parameters().len(), 1);
        assert_eq!(layer.parameter_names(), vec!["kernel"]);
        assert_eq!(layer.take_gradients().len(), 1);
    }
}
