//! Pairwise inner products between field embeddings.
//!
//! For input `[batch, num_fields, dim]` the output is `[batch, num_pairs]`
//! with pairs enumerated row-major: `(0,1), (0,2), ..., (0,N-1), (1,2), ...`.
//! With self pairs enabled the diagonal is included in the same order
//! (`(0,0), (0,1), ..., (1,1), ...`).

use crate::error::LayerError;
use crate::layer::Layer;
use crate::tensor::Tensor;

/// Inner-product interaction layer.
///
/// # Example
///
/// ```
/// use fgcnn_layers::inner_product::InnerProduct;
/// use fgcnn_layers::layer::Layer;
/// use fgcnn_layers::tensor::Tensor;
///
/// let layer = InnerProduct::new(false);
/// let x = Tensor::from_data(&[1, 3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
/// let out = layer.forward(&x).unwrap();
/// assert_eq!(out.data(), &[0.0, 1.0, 1.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InnerProduct {
    include_self_pairs: bool,
    cached_input: Option<Tensor>,
}

impl InnerProduct {
    /// Creates the layer.
    pub fn new(include_self_pairs: bool) -> Self {
        Self {
            include_self_pairs,
            cached_input: None,
        }
    }

    /// Whether `(i, i)` pairs are produced.
    pub fn include_self_pairs(&self) -> bool {
        self.include_self_pairs
    }

    /// Number of outputs for `num_fields` fields.
    pub fn num_pairs(&self, num_fields: usize) -> usize {
        if self.include_self_pairs {
            num_fields * (num_fields + 1) / 2
        } else {
            num_fields * num_fields.saturating_sub(1) / 2
        }
    }

    /// The `(i, j)` pairs in output order.
    pub fn pairs(&self, num_fields: usize) -> Vec<(usize, usize)> {
        let offset = usize::from(!self.include_self_pairs);
        let mut pairs = Vec::with_capacity(self.num_pairs(num_fields));
        for i in 0..num_fields {
            for j in i + offset..num_fields {
                pairs.push((i, j));
            }
        }
        pairs
    }

    fn dims(input: &Tensor) -> Result<(usize, usize, usize), LayerError> {
        if input.ndim() != 3 {
            return Err(LayerError::ForwardError {
                message: format!("InnerProduct expects 3D input, got {}D", input.ndim()),
            });
        }
        let s = input.shape();
        Ok((s[0], s[1], s[2]))
    }

    /// Performs forward pass and caches input for backward pass.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let output = self.forward(input)?;
        self.cached_input = Some(input.clone());
        Ok(output)
    }
}

impl Layer for InnerProduct {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        let (b, n, d) = Self::dims(input)?;
        let pairs = self.pairs(n);
        let x = input.data();
        let mut out = Vec::with_capacity(b * pairs.len());
        for s in 0..b {
            let row = &x[s * n * d..(s + 1) * n * d];
            for &(i, j) in &pairs {
                let dot: f32 = row[i * d..(i + 1) * d]
                    .iter()
                    .zip(&row[j * d..(j + 1) * d])
                    .map(|(a, b)| a * b)
                    .sum();
                out.push(dot);
            }
        }
        Ok(Tensor::from_data(&[b, pairs.len()], out))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let input = self
            .cached_input
            .as_ref()
            .ok_or(LayerError::NotInitialized)?;
        let (b, n, d) = Self::dims(input)?;
        let pairs = self.pairs(n);
        if grad.shape() != [b, pairs.len()].as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![b, pairs.len()],
                actual: grad.shape().to_vec(),
            });
        }

        let x = input.data();
        let g = grad.data();
        let mut dx = vec![0.0; x.len()];
        for s in 0..b {
            let base = s * n * d;
            for (p, &(i, j)) in pairs.iter().enumerate() {
                let gp = g[s * pairs.len() + p];
                for k in 0..d {
                    let xi = x[base + i * d + k];
                    let xj = x[base + j * d + k];
                    dx[base + i * d + k] += gp * xj;
                    dx[base + j * d + k] += gp * xi;
                }
            }
        }
        Ok(Tensor::from_data(input.shape(), dx))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![]
    }

    fn name(&self) -> &str {
        "InnerProduct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_order() {
        let layer = InnerProduct::new(false);
        assert_eq!(layer.pairs(4), vec![(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)]);
        assert_eq!(layer.num_pairs(4), 6);
        assert_eq!(layer.num_pairs(1), 0);
        assert_eq!(layer.num_pairs(0), 0);
    }

    #[test]
    fn test_self_pairs() {
        let layer = InnerProduct::new(true);
        assert_eq!(layer.pairs(2), vec![(0, 0), (0, 1), (1, 1)]);
        assert_eq!(layer.num_pairs(3), 6);
    }

    #[test]
    fn test_forward_values() {
        let layer = InnerProduct::new(false);
        let x = Tensor::from_data(&[1, 3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = layer.forward(&x).unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        assert_eq!(out.data(), &[11.0, 17.0, 39.0]);
    }

    #[test]
    fn test_backward() {
        let mut layer = InnerProduct::new(true);
        let x = Tensor::from_data(&[1, 2, 1], vec![2.0, 3.0]);
        layer.forward_train(&x).unwrap();
        // outputs: x0*x0, x0*x1, x1*x1
        let dx = layer.backward(&Tensor::ones(&[1, 3])).unwrap();
        assert_eq!(dx.data(), &[2.0 * 2.0 + 3.0, 2.0 + 2.0 * 3.0]);
    }

    #[test]
    fn test_single_field_has_no_pairs() {
        let layer = InnerProduct::new(false);
        let out = layer.forward(&Tensor::ones(&[2, 1, 4])).unwrap();
        assert_eq!(out.shape(), &[2, 0]);
    }
}
