//! Max pooling over channels-last tensors with valid padding.

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// 2D max pooling with stride equal to the pool size.
///
/// Input is `[batch, height, width, channels]`; trailing rows or columns
/// that do not fill a whole window are dropped.
#[derive(Debug, Clone)]
pub struct MaxPooling2D {
    pool_size: (usize, usize),
    cached_shape: Option<Vec<usize>>,
    /// Flat input index of the winner for each output element.
    cached_argmax: Option<Vec<usize>>,
}

impl MaxPooling2D {
    /// Creates a pooling layer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ConfigError`] for a zero-sized window.
    pub fn new(pool_size: (usize, usize)) -> Result<Self, LayerError> {
        if pool_size.0 == 0 || pool_size.1 == 0 {
            return Err(LayerError::ConfigError {
                message: format!("Pool size must be positive, got {pool_size:?}"),
            });
        }
        Ok(Self {
            pool_size,
            cached_shape: None,
            cached_argmax: None,
        })
    }

    /// Window size as (height, width).
    pub fn pool_size(&self) -> (usize, usize) {
        self.pool_size
    }

    /// Output spatial size for an input of `height x width`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ShapeMismatch`] if the window does not fit even
    /// once, which would leave an empty output.
    pub fn output_size(&self, height: usize, width: usize) -> Result<(usize, usize), LayerError> {
        let (oh, ow) = (height / self.pool_size.0, width / self.pool_size.1);
        if oh == 0 || ow == 0 {
            return Err(LayerError::ShapeMismatch {
                expected: vec![self.pool_size.0, self.pool_size.1],
                actual: vec![height, width],
            });
        }
        Ok((oh, ow))
    }

    fn pool(&self, input: &Tensor) -> Result<(Tensor, Vec<usize>), LayerError> {
        if input.ndim() != 4 {
            return Err(LayerError::ForwardError {
                message: format!("MaxPooling2D expects 4D NHWC input, got {}D", input.ndim()),
            });
        }
        let s = input.shape();
        let (b, h, w, c) = (s[0], s[1], s[2], s[3]);
        let (oh, ow) = self.output_size(h, w)?;
        let (ph, pw) = self.pool_size;
        let x = input.data();

        let mut out = Vec::with_capacity(b * oh * ow * c);
        let mut argmax = Vec::with_capacity(b * oh * ow * c);
        for n in 0..b {
            for oy in 0..oh {
                for ox in 0..ow {
                    for ch in 0..c {
                        let mut best = ((n * h + oy * ph) * w + ox * pw) * c + ch;
                        for i in 0..ph {
                            for j in 0..pw {
                                let idx = ((n * h + oy * ph + i) * w + ox * pw + j) * c + ch;
                                if x[idx] > x[best] {
                                    best = idx;
                                }
                            }
                        }
                        out.push(x[best]);
                        argmax.push(best);
                    }
                }
            }
        }
        Ok((Tensor::from_data(&[b, oh, ow, c], out), argmax))
    }

    /// Performs forward pass and caches the winning positions.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let (out, argmax) = self.pool(input)?;
        self.cached_shape = Some(input.shape().to_vec());
        self.cached_argmax = Some(argmax);
        Ok(out)
    }
}

impl Layer for MaxPooling2D {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.pool(input).map(|(out, _)| out)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let shape = self.cached_shape.as_ref().ok_or(LayerError::NotInitialized)?;
        let argmax = self.cached_argmax.as_ref().ok_or(LayerError::NotInitialized)?;
        if grad.numel() != argmax.len() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![argmax.len()],
                actual: grad.shape().to_vec(),
            });
        }
        let mut dx = Tensor::zeros(shape);
        let dx_data = dx.data_mut();
        for (&idx, &g) in argmax.iter().zip(grad.data()) {
            dx_data[idx] += g;
        }
        Ok(dx)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "MaxPooling2D"
    }
}
