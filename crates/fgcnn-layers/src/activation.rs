//! Activation function layers.
//!
//! This module provides the activation functions used by CTR models as
//! parameter-free layers (ReLU, Sigmoid, Tanh), the serializable
//! [`ActivationType`] selector and the [`ActivationLayer`] dispatcher that
//! composite layers embed.

use std::fmt;
use std::str::FromStr;

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Rectified Linear Unit (ReLU) activation function.
///
/// Computes `f(x) = max(0, x)` element-wise.
///
/// # Example
///
/// ```
/// use fgcnn_layers::activation::ReLU;
/// use fgcnn_layers::layer::Layer;
/// use fgcnn_layers::tensor::Tensor;
///
/// let relu = ReLU::new();
/// let input = Tensor::from_data(&[2, 2], vec![-1.0, 0.0, 1.0, 2.0]);
/// let output = relu.forward(&input).unwrap();
/// assert_eq!(output.data(), &[0.0, 0.0, 1.0, 2.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReLU {
    /// Cached input for backward pass
    cached_input: Option<Tensor>,
}

impl ReLU {
    /// Creates a new ReLU activation layer.
    pub fn new() -> Self {
        Self { cached_input: None }
    }

    /// Performs forward pass and caches input for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.cached_input = Some(input.clone());
        self.forward(input)
    }
}

impl Layer for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(|x| x.max(0.0)))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        let mask = input.map(|x| if x > 0.0 { 1.0 } else { 0.0 });
        Ok(grad.mul(&mask))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "ReLU"
    }
}

/// Sigmoid activation function.
///
/// Computes `f(x) = 1 / (1 + exp(-x))` element-wise.
#[derive(Debug, Clone, Default)]
pub struct Sigmoid {
    /// Cached output for backward pass
    cached_output: Option<Tensor>,
}

impl Sigmoid {
    /// Creates a new Sigmoid activation layer.
    pub fn new() -> Self {
        Self {
            cached_output: None,
        }
    }

    /// Performs forward pass and caches output for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_output = Some(output.clone());
        Ok(output)
    }
}

impl Layer for Sigmoid {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(sigmoid))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let output = self
            .cached_output
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        // sigmoid'(x) = y * (1 - y)
        let grad_multiplier = output.map(|y| y * (1.0 - y));
        Ok(grad.mul(&grad_multiplier))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Sigmoid"
    }
}

/// Hyperbolic tangent activation function.
#[derive(Debug, Clone, Default)]
pub struct Tanh {
    cached_output: Option<Tensor>,
}

impl Tanh {
    /// Creates a new Tanh activation layer.
    pub fn new() -> Self {
        Self {
            cached_output: None,
        }
    }

    /// Performs forward pass and caches output for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_output = Some(output.clone());
        Ok(output)
    }
}

impl Layer for Tanh {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        Ok(input.map(f32::tanh))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let output = self
            .cached_output
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;

        let grad_multiplier = output.map(|y| 1.0 - y * y);
        Ok(grad.mul(&grad_multiplier))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "Tanh"
    }
}

/// Numerically stable logistic function.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Activation function selector, serialized by its lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationType {
    /// Rectified Linear Unit
    #[default]
    Relu,
    /// Sigmoid function
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// No activation (identity)
    Linear,
}

impl ActivationType {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationType::Relu => "relu",
            ActivationType::Sigmoid => "sigmoid",
            ActivationType::Tanh => "tanh",
            ActivationType::Linear => "linear",
        }
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationType {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(ActivationType::Relu),
            "sigmoid" => Ok(ActivationType::Sigmoid),
            "tanh" => Ok(ActivationType::Tanh),
            "linear" | "none" => Ok(ActivationType::Linear),
            other => Err(LayerError::ConfigError {
                message: format!("unknown activation '{other}'"),
            }),
        }
    }
}

/// An activation layer selected at runtime.
#[derive(Debug, Clone)]
pub enum ActivationLayer {
    /// ReLU
    Relu(ReLU),
    /// Sigmoid
    Sigmoid(Sigmoid),
    /// Tanh
    Tanh(Tanh),
    /// Identity
    Linear,
}

impl ActivationLayer {
    /// Creates the layer for an [`ActivationType`].
    pub fn from_activation_type(activation: ActivationType) -> Self {
        match activation {
            ActivationType::Relu => ActivationLayer::Relu(ReLU::new()),
            ActivationType::Sigmoid => ActivationLayer::Sigmoid(Sigmoid::new()),
            ActivationType::Tanh => ActivationLayer::Tanh(Tanh::new()),
            ActivationType::Linear => ActivationLayer::Linear,
        }
    }

    /// Performs forward pass and caches what backward needs.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            Self::Relu(a) => a.forward_train(input),
            Self::Sigmoid(a) => a.forward_train(input),
            Self::Tanh(a) => a.forward_train(input),
            Self::Linear => Ok(input.clone()),
        }
    }
}

impl Layer for ActivationLayer {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            Self::Relu(a) => a.forward(input),
            Self::Sigmoid(a) => a.forward(input),
            Self::Tanh(a) => a.forward(input),
            Self::Linear => Ok(input.clone()),
        }
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        match self {
            Self::Relu(a) => a.backward(grad),
            Self::Sigmoid(a) => a.backward(grad),
            Self::Tanh(a) => a.backward(grad),
            Self::Linear => Ok(grad.clone()),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        match self {
            Self::Relu(a) => a.name(),
            Self::Sigmoid(a) => a.name(),
            Self::Tanh(a) => a.name(),
            Self::Linear => "Linear",
        }
    }
}
