//! Interaction block: pairwise inner products over the combined feature
//! sequence, concatenated with the flattened sequence and dense values.

use fgcnn_layers::inner_product::InnerProduct;
use fgcnn_layers::layer::Layer;
use fgcnn_layers::tensor::Tensor;
use fgcnn_layers::LayerError;

use crate::error::Result;

/// Builds the head input `[flatten(combined), inner_products, dense]`.
#[derive(Debug, Clone)]
pub struct Interaction {
    inner_product: InnerProduct,
    num_features: usize,
    dim: usize,
    num_dense: usize,
}

impl Interaction {
    /// `num_features` is the combined length `F + generated_len`.
    pub fn new(num_features: usize, dim: usize, num_dense: usize, include_self_pairs: bool) -> Self {
        Self {
            inner_product: InnerProduct::new(include_self_pairs),
            num_features,
            dim,
            num_dense,
        }
    }

    /// Number of inner-product terms.
    pub fn num_pairs(&self) -> usize {
        self.inner_product.num_pairs(self.num_features)
    }

    /// Width of the produced vector.
    pub fn output_dim(&self) -> usize {
        self.num_features * self.dim + self.num_pairs() + self.num_dense
    }

    fn check(&self, combined: &Tensor, dense: Option<&Tensor>) -> Result<usize> {
        let s = combined.shape();
        if s.len() != 3 || s[1] != self.num_features || s[2] != self.dim {
            return Err(LayerError::ShapeMismatch {
                expected: vec![s.first().copied().unwrap_or(0), self.num_features, self.dim],
                actual: s.to_vec(),
            }
            .into());
        }
        let b = s[0];
        let dense_cols = dense.map_or(0, |d| d.shape().get(1).copied().unwrap_or(0));
        if dense_cols != self.num_dense {
            return Err(LayerError::InvalidInputDimension {
                expected: self.num_dense,
                actual: dense_cols,
            }
            .into());
        }
        Ok(b)
    }

    fn assemble(&self, b: usize, combined: &Tensor, products: &Tensor, dense: Option<&Tensor>) -> Tensor {
        let flat = combined.reshape(&[b, self.num_features * self.dim]);
        let mut parts = vec![&flat, products];
        if let Some(d) = dense {
            parts.push(d);
        }
        Tensor::concat(&parts, 1)
    }

    /// Head input `[B, output_dim]`.
    pub fn forward(&self, combined: &Tensor, dense: Option<&Tensor>) -> Result<Tensor> {
        let b = self.check(combined, dense)?;
        let products = self.inner_product.forward(combined)?;
        Ok(self.assemble(b, combined, &products, dense))
    }

    /// Training variant of [`Interaction::forward`].
    pub fn forward_train(&mut self, combined: &Tensor, dense: Option<&Tensor>) -> Result<Tensor> {
        let b = self.check(combined, dense)?;
        let products = self.inner_product.forward_train(combined)?;
        Ok(self.assemble(b, combined, &products, dense))
    }

    /// Gradient w.r.t. the combined sequence for a `[B, output_dim]` gradient.
    ///
    /// Dense inputs are not trainable, so their slice is dropped.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let b = grad.shape().first().copied().unwrap_or(0);
        if grad.shape() != [b, self.output_dim()].as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![b, self.output_dim()],
                actual: grad.shape().to_vec(),
            }
            .into());
        }
        let parts = grad.split(1, &[self.num_features * self.dim, self.num_pairs(), self.num_dense]);
        let mut combined_grad = parts[0].reshape(&[b, self.num_features, self.dim]);
        combined_grad.add_assign(&self.inner_product.backward(&parts[1])?);
        Ok(combined_grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dim() {
        let block = Interaction::new(4, 2, 1, false);
        assert_eq!(block.num_pairs(), 6);
        assert_eq!(block.output_dim(), 4 * 2 + 6 + 1);
        assert_eq!(Interaction::new(4, 2, 0, true).num_pairs(), 10);
    }

    #[test]
    fn test_forward_layout() {
        let block = Interaction::new(2, 2, 1, false);
        let combined = Tensor::from_data(&[1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let dense = Tensor::from_data(&[1, 1], vec![9.0]);
        let out = block.forward(&combined, Some(&dense)).unwrap();
        assert_eq!(out.data(), &[1.0, 2.0, 3.0, 4.0, 11.0, 9.0]);
    }

    #[test]
    fn test_dense_width_is_checked() {
        let block = Interaction::new(2, 2, 1, false);
        assert!(block.forward(&Tensor::ones(&[1, 2, 2]), None).is_err());
    }

    #[test]
    fn test_backward_sums_both_paths() {
        let mut block = Interaction::new(2, 1, 0, false);
        let combined = Tensor::from_data(&[1, 2, 1], vec![2.0, 3.0]);
        block.forward_train(&combined, None).unwrap();
        let grad = block.backward(&Tensor::ones(&[1, 3])).unwrap();
        // d(x0*x1)/dx0 = x1, plus 1 from the flattened copy.
        assert_eq!(grad.data(), &[4.0, 3.0]);
    }
}
