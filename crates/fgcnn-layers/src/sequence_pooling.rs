//! Masked pooling over padded sequences.
//!
//! Input is `[batch, max_len, dim]` plus a true length per example. Only the
//! first `length` positions of each row take part; an empty sequence pools
//! to a zero vector in every mode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LayerError;
use crate::tensor::Tensor;

/// Pooling combiner for variable-length sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolingMode {
    /// Sum pooling
    Sum,
    /// Mean pooling (divides by the true length)
    #[default]
    Mean,
    /// Max pooling
    Max,
}

impl PoolingMode {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolingMode::Sum => "sum",
            PoolingMode::Mean => "mean",
            PoolingMode::Max => "max",
        }
    }
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolingMode {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(PoolingMode::Sum),
            "mean" => Ok(PoolingMode::Mean),
            "max" => Ok(PoolingMode::Max),
            other => Err(LayerError::ConfigError {
                message: format!("unknown sequence combiner '{other}', expected sum, mean or max"),
            }),
        }
    }
}

/// Sequence pooling layer.
#[derive(Debug, Clone)]
pub struct SequencePooling {
    mode: PoolingMode,
    cached_shape: Option<Vec<usize>>,
    cached_lengths: Option<Vec<usize>>,
    /// For max pooling: winning position per (example, dim), `None` if empty.
    cached_argmax: Option<Vec<Option<usize>>>,
}

impl SequencePooling {
    /// Creates a pooling layer with the given combiner.
    pub fn new(mode: PoolingMode) -> Self {
        Self {
            mode,
            cached_shape: None,
            cached_lengths: None,
            cached_argmax: None,
        }
    }

    /// The combiner.
    pub fn mode(&self) -> PoolingMode {
        self.mode
    }

    fn check(input: &Tensor, lengths: &[usize]) -> Result<(usize, usize, usize), LayerError> {
        if input.ndim() != 3 {
            return Err(LayerError::ForwardError {
                message: format!("SequencePooling expects 3D input, got {}D", input.ndim()),
            });
        }
        let (b, l, d) = (input.shape()[0], input.shape()[1], input.shape()[2]);
        if lengths.len() != b {
            return Err(LayerError::InvalidInputDimension {
                expected: b,
                actual: lengths.len(),
            });
        }
        Ok((b, l, d))
    }

    fn pool_impl(&self, input: &Tensor, lengths: &[usize]) -> Result<(Tensor, Vec<Option<usize>>), LayerError> {
        let (b, l, d) = Self::check(input, lengths)?;
        let data = input.data();
        let mut out = vec![0.0; b * d];
        let mut argmax = Vec::new();
        if self.mode == PoolingMode::Max {
            argmax = vec![None; b * d];
        }

        for i in 0..b {
            let len = lengths[i].min(l);
            if len == 0 {
                continue;
            }
            let row = &data[i * l * d..(i + 1) * l * d];
            let dst = &mut out[i * d..(i + 1) * d];
            match self.mode {
                PoolingMode::Sum | PoolingMode::Mean => {
                    for p in 0..len {
                        for k in 0..d {
                            dst[k] += row[p * d + k];
                        }
                    }
                    if self.mode == PoolingMode::Mean {
                        let n = len as f32;
                        dst.iter_mut().for_each(|v| *v /= n);
                    }
                }
                PoolingMode::Max => {
                    for k in 0..d {
                        let mut best = 0;
                        for p in 1..len {
                            if row[p * d + k] > row[best * d + k] {
                                best = p;
                            }
                        }
                        dst[k] = row[best * d + k];
                        argmax[i * d + k] = Some(best);
                    }
                }
            }
        }
        Ok((Tensor::from_data(&[b, d], out), argmax))
    }

    /// Pools `input` of shape `[B, L, D]` to `[B, D]`.
    ///
    /// Lengths greater than `L` are clamped to `L`.
    pub fn pool(&self, input: &Tensor, lengths: &[usize]) -> Result<Tensor, LayerError> {
        self.pool_impl(input, lengths).map(|(out, _)| out)
    }

    /// Pools and caches what [`SequencePooling::backward`] needs.
    pub fn pool_train(&mut self, input: &Tensor, lengths: &[usize]) -> Result<Tensor, LayerError> {
        let (out, argmax) = self.pool_impl(input, lengths)?;
        self.cached_shape = Some(input.shape().to_vec());
        self.cached_lengths = Some(lengths.to_vec());
        self.cached_argmax = Some(argmax);
        Ok(out)
    }

    /// Maps the `[B, D]` output gradient back to `[B, L, D]`.
    ///
    /// Padding positions receive zero gradient.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let shape = self.cached_shape.as_ref().ok_or(LayerError::NotInitialized)?;
        let lengths = self.cached_lengths.as_ref().ok_or(LayerError::NotInitialized)?;
        let (b, l, d) = (shape[0], shape[1], shape[2]);
        if grad.shape() != [b, d].as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![b, d],
                actual: grad.shape().to_vec(),
            });
        }

        let g = grad.data();
        let mut out = vec![0.0; b * l * d];
        for i in 0..b {
            let len = lengths[i].min(l);
            if len == 0 {
                continue;
            }
            let dst = &mut out[i * l * d..(i + 1) * l * d];
            match self.mode {
                PoolingMode::Sum | PoolingMode::Mean => {
                    let scale = if self.mode == PoolingMode::Mean {
                        1.0 / len as f32
                    } else {
                        1.0
                    };
                    for p in 0..len {
                        for k in 0..d {
                            dst[p * d + k] = g[i * d + k] * scale;
                        }
                    }
                }
                PoolingMode::Max => {
                    let argmax = self.cached_argmax.as_ref().ok_or(LayerError::NotInitialized)?;
                    for k in 0..d {
                        if let Some(p) = argmax[i * d + k] {
                            dst[p * d + k] = g[i * d + k];
                        }
                    }
                }
            }
        }
        Ok(Tensor::from_data(shape, out))
    }
}
