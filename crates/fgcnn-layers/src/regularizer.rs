//! Regularization utilities for learnable parameters.

use serde::{Deserialize, Serialize};

use crate::tensor::Tensor;

/// Regularizer types supported for layer parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub enum Regularizer {
    /// No regularization.
    #[default]
    None,
    /// L1 regularization with coefficient.
    L1(f32),
    /// L2 regularization with coefficient.
    L2(f32),
    /// Combined L1 + L2 regularization.
    L1L2 {
        /// L1 coefficient
        l1: f32,
        /// L2 coefficient
        l2: f32,
    },
}

impl Regularizer {
    /// L2 regularizer, or [`Regularizer::None`] when `lambda` is zero.
    pub fn l2(lambda: f32) -> Self {
        if lambda == 0.0 {
            Regularizer::None
        } else {
            Regularizer::L2(lambda)
        }
    }

    /// Returns the regularization loss for the given parameter tensor.
    pub fn loss(&self, param: &Tensor) -> f32 {
        match *self {
            Regularizer::None => 0.0,
            Regularizer::L1(lambda) => param.abs().sum() * lambda,
            Regularizer::L2(lambda) => param.sqr().sum() * lambda,
            Regularizer::L1L2 { l1, l2 } => param.abs().sum() * l1 + param.sqr().sum() * l2,
        }
    }

    /// Returns the gradient contribution of this regularizer for the given parameter.
    pub fn grad(&self, param: &Tensor) -> Option<Tensor> {
        match *self {
            Regularizer::None => None,
            Regularizer::L1(lambda) => Some(param.signum().scale(lambda)),
            Regularizer::L2(lambda) => Some(param.scale(2.0 * lambda)),
            Regularizer::L1L2 { l1, l2 } => {
                let l1_grad = param.signum().scale(l1);
                let l2_grad = param.scale(2.0 * l2);
                Some(l1_grad.add(&l2_grad))
            }
        }
    }

    /// Adds this regularizer's gradient for `param` into `grad`.
    pub fn accumulate_grad(&self, param: &Tensor, grad: &mut Tensor) {
        if let Some(reg) = self.grad(param) {
            grad.add_assign(&reg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_l2_loss_and_grad() {
        let w = Tensor::from_data(&[2], vec![1.0, -2.0]);
        let reg = Regularizer::L2(0.5);
        assert_relative_eq!(reg.loss(&w), 2.5);
        assert_eq!(reg.grad(&w).unwrap().data(), &[1.0, -2.0]);
    }

    #[test]
    fn test_l1_grad_is_sign() {
        let w = Tensor::from_data(&[3], vec![3.0, 0.0, -1.0]);
        let g = Regularizer::L1(0.1).grad(&w).unwrap();
        assert_eq!(g.data(), &[0.1, 0.0, -0.1]);
    }

    #[test]
    fn test_zero_l2_is_none() {
        assert_eq!(Regularizer::l2(0.0), Regularizer::None);
        assert!(Regularizer::None.grad(&Tensor::ones(&[2])).is_none());
    }
}
