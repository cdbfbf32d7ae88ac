//! Training losses over `[B, 1]` predictions.

use fgcnn_layers::activation::ActivationType;
use fgcnn_layers::tensor::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{FgcnnError, Result};

const PROB_EPSILON: f32 = 1e-7;

/// Loss applied to the model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// Binary cross-entropy on probabilities, clamped to `[1e-7, 1 - 1e-7]`.
    LogLoss,
    /// Mean squared error.
    MeanSquaredError,
}

impl Loss {
    /// Log loss for a sigmoid output, squared error for a linear one.
    pub fn for_activation(activation: ActivationType) -> Self {
        match activation {
            ActivationType::Sigmoid => Loss::LogLoss,
            _ => Loss::MeanSquaredError,
        }
    }

    /// Mean loss over the batch and its gradient w.r.t. `predictions`.
    pub fn compute(&self, predictions: &Tensor, labels: &[f32]) -> Result<(f32, Tensor)> {
        let preds = predictions.data();
        if preds.len() != labels.len() {
            return Err(FgcnnError::input(
                "labels",
                format!("expected {} labels, got {}", preds.len(), labels.len()),
            ));
        }
        if preds.is_empty() {
            return Err(FgcnnError::input("labels", "no labels"));
        }
        let n = preds.len() as f32;

        let mut loss = 0.0;
        let mut grad = Vec::with_capacity(preds.len());
        match self {
            Loss::LogLoss => {
                for (&p, &y) in preds.iter().zip(labels) {
                    let p = p.clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
                    loss += -y * p.ln() - (1.0 - y) * (1.0 - p).ln();
                    grad.push((p - y) / (p * (1.0 - p)) / n);
                }
            }
            Loss::MeanSquaredError => {
                for (&p, &y) in preds.iter().zip(labels) {
                    let diff = p - y;
                    loss += diff * diff;
                    grad.push(2.0 * diff / n);
                }
            }
        }
        Ok((loss / n, Tensor::from_data(predictions.shape(), grad)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_loss_value() {
        let preds = Tensor::from_data(&[2, 1], vec![0.5, 0.5]);
        let (loss, grad) = Loss::LogLoss.compute(&preds, &[1.0, 0.0]).unwrap();
        assert_relative_eq!(loss, std::f32::consts::LN_2, epsilon = 1e-6);
        assert_relative_eq!(grad.data()[0], -1.0, epsilon = 1e-5);
        assert_relative_eq!(grad.data()[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_log_loss_is_finite_at_extremes() {
        let preds = Tensor::from_data(&[2, 1], vec![0.0, 1.0]);
        let (loss, grad) = Loss::LogLoss.compute(&preds, &[1.0, 0.0]).unwrap();
        assert!(loss.is_finite());
        assert!(grad.data().iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_mse() {
        let preds = Tensor::from_data(&[2, 1], vec![1.0, 3.0]);
        let (loss, grad) = Loss::MeanSquaredError.compute(&preds, &[0.0, 1.0]).unwrap();
        assert_relative_eq!(loss, 2.5);
        assert_eq!(grad.data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_label_count_checked() {
        let preds = Tensor::zeros(&[2, 1]);
        assert!(Loss::MeanSquaredError.compute(&preds, &[0.0]).is_err());
        assert_eq!(Loss::for_activation(ActivationType::Sigmoid), Loss::LogLoss);
        assert_eq!(Loss::for_activation(ActivationType::Linear), Loss::MeanSquaredError);
    }
}
