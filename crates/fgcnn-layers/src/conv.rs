#![allow(clippy::needless_range_loop)]
//! 2D convolution over channels-last tensors.
//!
//! Input layout is `[batch, height, width, in_channels]` and the kernel is
//! `[kernel_h, kernel_w, in_channels, filters]`. Stride is fixed at 1.

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::activation::{ActivationLayer, ActivationType};
use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;

/// Padding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Output has the input's spatial size; extra padding goes after.
    #[default]
    Same,
    /// No padding.
    Valid,
}

/// Configuration for [`Conv2D`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2DConfig {
    /// Input channels
    pub in_channels: usize,
    /// Number of output filters
    pub filters: usize,
    /// Kernel size as (height, width)
    pub kernel_size: (usize, usize),
    /// Padding scheme
    pub padding: Padding,
    /// Activation applied to the output
    pub activation: ActivationType,
    /// Whether to add a bias per filter
    pub use_bias: bool,
    /// Kernel initializer
    pub kernel_initializer: Initializer,
    /// Kernel regularizer
    pub kernel_regularizer: Regularizer,
}

impl Conv2DConfig {
    /// Creates a config with same padding, linear activation and bias.
    pub fn new(in_channels: usize, filters: usize, kernel_size: (usize, usize)) -> Self {
        Self {
            in_channels,
            filters,
            kernel_size,
            padding: Padding::Same,
            activation: ActivationType::Linear,
            use_bias: true,
            kernel_initializer: Initializer::GlorotUniform,
            kernel_regularizer: Regularizer::None,
        }
    }

    /// Sets the padding scheme.
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the output activation.
    pub fn with_activation(mut self, activation: ActivationType) -> Self {
        self.activation = activation;
        self
    }

    /// Sets whether to use bias.
    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    /// Sets the kernel regularizer.
    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = regularizer;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.in_channels == 0 || self.filters == 0 {
            return Err(LayerError::ConfigError {
                message: format!(
                    "Conv2D channels must be positive, got in={} filters={}",
                    self.in_channels, self.filters
                ),
            });
        }
        if self.kernel_size.0 == 0 || self.kernel_size.1 == 0 {
            return Err(LayerError::ConfigError {
                message: format!("Conv2D kernel size must be positive, got {:?}", self.kernel_size),
            });
        }
        Ok(())
    }

    /// Builds the layer.
    pub fn build(self, rng: &mut StdRng) -> Result<Conv2D, LayerError> {
        Conv2D::from_config(self, rng)
    }
}

/// 2D convolution layer with stride 1 and a fused activation.
#[derive(Debug, Clone)]
pub struct Conv2D {
    config: Conv2DConfig,
    kernel: Tensor,
    bias: Tensor,
    activation: ActivationLayer,
    kernel_grad: Option<Tensor>,
    bias_grad: Option<Tensor>,
    cached_input: Option<Tensor>,
}

impl Conv2D {
    /// Creates the layer from a validated configuration.
    pub fn from_config(config: Conv2DConfig, rng: &mut StdRng) -> Result<Self, LayerError> {
        config.validate()?;
        let (kh, kw) = config.kernel_size;
        let kernel = config
            .kernel_initializer
            .initialize(&[kh, kw, config.in_channels, config.filters], rng)?;
        let bias = Tensor::zeros(&[config.filters]);
        let activation = ActivationLayer::from_activation_type(config.activation);
        Ok(Self {
            config,
            kernel,
            bias,
            activation,
            kernel_grad: None,
            bias_grad: None,
            cached_input: None,
        })
    }

    /// The layer configuration.
    pub fn config(&self) -> &Conv2DConfig {
        &self.config
    }

    /// The kernel tensor `[kh, kw, in, filters]`.
    pub fn kernel(&self) -> &Tensor {
        &self.kernel
    }

    fn pads(&self) -> (usize, usize) {
        match self.config.padding {
            Padding::Same => ((self.config.kernel_size.0 - 1) / 2, (self.config.kernel_size.1 - 1) / 2),
            Padding::Valid => (0, 0),
        }
    }

    /// Output spatial size for an input of `height x width`.
    pub fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize), LayerError> {
        let (kh, kw) = self.config.kernel_size;
        match self.config.padding {
            Padding::Same => Ok((height, width)),
            Padding::Valid => {
                if height < kh || width < kw {
                    return Err(LayerError::ShapeMismatch {
                        expected: vec![kh, kw],
                        actual: vec![height, width],
                    });
                }
                Ok((height - kh + 1, width - kw + 1))
            }
        }
    }

    fn input_dims(&self, input: &Tensor) -> Result<(usize, usize, usize), LayerError> {
        if input.ndim() != 4 {
            return Err(LayerError::ForwardError {
                message: format!("Conv2D expects 4D NHWC input, got {}D", input.ndim()),
            });
        }
        let s = input.shape();
        if s[3] != self.config.in_channels {
            return Err(LayerError::InvalidInputDimension {
                expected: self.config.in_channels,
                actual: s[3],
            });
        }
        Ok((s[0], s[1], s[2]))
    }

    /// Convolution plus bias, before the activation.
    fn convolve(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let (b, h, w) = self.input_dims(input)?;
        let (oh, ow) = self.output_size(h, w)?;
        let (kh, kw) = self.config.kernel_size;
        let (pt, pl) = self.pads();
        let cin = self.config.in_channels;
        let cout = self.config.filters;
        let x = input.data();
        let k = self.kernel.data();

        let mut out = vec![0.0; b * oh * ow * cout];
        for n in 0..b {
            for oy in 0..oh {
                for ox in 0..ow {
                    let o_base = ((n * oh + oy) * ow + ox) * cout;
                    if self.config.use_bias {
                        out[o_base..o_base + cout].copy_from_slice(self.bias.data());
                    }
                    for i in 0..kh {
                        let iy = (oy + i) as isize - pt as isize;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for j in 0..kw {
                            let ix = (ox + j) as isize - pl as isize;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }
                            let x_base = ((n * h + iy as usize) * w + ix as usize) * cin;
                            for c in 0..cin {
                                let xv = x[x_base + c];
                                let k_base = ((i * kw + j) * cin + c) * cout;
                                for o in 0..cout {
                                    out[o_base + o] += xv * k[k_base + o];
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(Tensor::from_data(&[b, oh, ow, cout], out))
    }

    /// Performs forward pass and caches input for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let pre = self.convolve(input)?;
        let output = self.activation.forward_train(&pre)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }
}

impl Layer for Conv2D {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let pre = self.convolve(input)?;
        self.activation.forward(&pre)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .take()
            .ok_or(LayerError::NotInitialized)?;
        let (b, h, w) = self.input_dims(&input)?;
        let (oh, ow) = self.output_size(h, w)?;
        let cout = self.config.filters;
        if grad.shape() != [b, oh, ow, cout].as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![b, oh, ow, cout],
                actual: grad.shape().to_vec(),
            });
        }

        let g = self.activation.backward(grad)?;
        let g = g.data();
        let (kh, kw) = self.config.kernel_size;
        let (pt, pl) = self.pads();
        let cin = self.config.in_channels;
        let x = input.data();
        let k = self.kernel.data();

        let mut dk = vec![0.0; self.kernel.numel()];
        let mut dx = vec![0.0; input.numel()];
        let mut db = vec![0.0; cout];
        for n in 0..b {
            for oy in 0..oh {
                for ox in 0..ow {
                    let o_base = ((n * oh + oy) * ow + ox) * cout;
                    let go = &g[o_base..o_base + cout];
                    for o in 0..cout {
                        db[o] += go[o];
                    }
                    for i in 0..kh {
                        let iy = (oy + i) as isize - pt as isize;
                        if iy < 0 || iy >= h as isize {
                            continue;
                        }
                        for j in 0..kw {
                            let ix = (ox + j) as isize - pl as isize;
                            if ix < 0 || ix >= w as isize {
                                continue;
                            }
                            let x_base = ((n * h + iy as usize) * w + ix as usize) * cin;
                            for c in 0..cin {
                                let k_base = ((i * kw + j) * cin + c) * cout;
                                let xv = x[x_base + c];
                                let mut acc = 0.0;
                                for o in 0..cout {
                                    dk[k_base + o] += xv * go[o];
                                    acc += k[k_base + o] * go[o];
                                }
                                dx[x_base + c] += acc;
                            }
                        }
                    }
                }
            }
        }

        let mut kernel_grad = Tensor::from_data(self.kernel.shape(), dk);
        self.config
            .kernel_regularizer
            .accumulate_grad(&self.kernel, &mut kernel_grad);
        self.kernel_grad = Some(kernel_grad);
        if self.config.use_bias {
            self.bias_grad = Some(Tensor::from_data(&[cout], db));
        }
        Ok(Tensor::from_data(input.shape(), dx))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        if self.config.use_bias {
            vec![&self.kernel, &self.bias]
        } else {
            vec![&self.kernel]
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        if self.config.use_bias {
            vec![&mut self.kernel, &mut self.bias]
        } else {
            vec![&mut self.kernel]
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        if self.config.use_bias {
            vec!["kernel", "bias"]
        } else {
            vec!["kernel"]
        }
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        if self.config.use_bias {
            vec![self.kernel_grad.take(), self.bias_grad.take()]
        } else {
            vec![self.kernel_grad.take()]
        }
    }

    fn regularization_loss(&self) -> f32 {
        self.config.kernel_regularizer.loss(&self.kernel)
    }

    fn name(&self) -> &str {
        "Conv2D"
    }
}
