//! The [`Layer`] trait shared by every layer in the crate.

use crate::error::LayerError;
use crate::tensor::Tensor;

/// A neural network layer that supports forward and backward propagation.
///
/// `forward` is the inference path and never mutates the layer. Training
/// goes through a layer-specific `forward_train` that caches what `backward`
/// needs; `backward` then stores parameter gradients inside the layer until
/// they are collected with [`Layer::take_gradients`].
///
/// # Example
///
/// ```
/// use fgcnn_layers::dense::Dense;
/// use fgcnn_layers::layer::Layer;
/// use fgcnn_layers::tensor::Tensor;
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(7);
/// let layer = Dense::new(128, 64, &mut rng).unwrap();
/// let input = Tensor::zeros(&[32, 128]);
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[32, 64]);
/// ```
pub trait Layer: Send + Sync {
    /// Performs a forward pass through the layer.
    ///
    /// # Errors
    ///
    /// Returns a [`LayerError`] if the input shape is incompatible with the layer
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError>;

    /// Performs a backward pass through the layer.
    ///
    /// Takes the gradient of the loss with respect to the layer's output and
    /// returns the gradient with respect to the layer's input. Parameter
    /// gradients (including regularization terms) are stored in the layer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotInitialized`] if no training forward pass
    /// preceded this call, or a shape error for an incompatible gradient.
    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError>;

    /// Returns references to the layer's learnable parameters.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Returns mutable references to the layer's learnable parameters.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Short names of the parameters, aligned with [`Layer::parameters`].
    fn parameter_names(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Moves the gradients computed by the last backward pass out of the
    /// layer, aligned with [`Layer::parameters_mut`].
    ///
    /// Parameters without a gradient yield `None`.
    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        Vec::new()
    }

    /// Returns the regularization loss contributed by this layer.
    fn regularization_loss(&self) -> f32 {
        0.0
    }

    /// Returns the name of the layer for debugging and logging purposes.
    fn name(&self) -> &str {
        "Layer"
    }

    /// Returns whether the layer is in training mode.
    fn is_training(&self) -> bool {
        true
    }

    /// Sets the layer's training mode.
    fn set_training(&mut self, _training: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y = w * x` with a single scalar weight.
    struct Scale {
        w: Tensor,
        input: Option<Tensor>,
        w_grad: Option<Tensor>,
    }

    impl Layer for Scale {
        fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
            Ok(input.scale(self.w.data()[0]))
        }

        fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
            let input = self.input.as_ref().ok_or(LayerError::NotInitialized)?;
            self.w_grad = Some(Tensor::from_data(&[1], vec![input.mul(grad).sum()]));
            Ok(grad.scale(self.w.data()[0]))
        }

        fn parameters(&self) -> Vec<&Tensor> {
            vec![&self.w]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            vec![&mut self.w]
        }

        fn parameter_names(&self) -> Vec<&'static str> {
            vec!["w"]
        }

        fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
            vec![self.w_grad.take()]
        }
    }

    fn scale(w: f32) -> Scale {
        Scale {
            w: Tensor::from_data(&[1], vec![w]),
            input: None,
            w_grad: None,
        }
    }

    #[test]
    fn test_backward_requires_cached_input() {
        let mut layer = scale(2.0);
        let grad = Tensor::ones(&[2, 3]);
        assert!(matches!(layer.backward(&grad), Err(LayerError::NotInitialized)));
    }

    #[test]
    fn test_gradients_drain_once() {
        let mut layer = scale(2.0);
        let input = Tensor::from_data(&[1, 2], vec![1.0, 3.0]);
        assert_eq!(layer.forward(&input).unwrap().data(), &[2.0, 6.0]);
        layer.input = Some(input);

        let input_grad = layer.backward(&Tensor::ones(&[1, 2])).unwrap();
        assert_eq!(input_grad.data(), &[2.0, 2.0]);
        assert_eq!(layer.take_gradients()[0].as_ref().map(|g| g.data()[0]), Some(4.0));
        assert!(layer.take_gradients()[0].is_none());
    }

    #[test]
    fn test_defaults() {
        let mut layer = scale(1.0);
        assert_eq!(layer.name(), "Layer");
        assert_eq!(layer.regularization_loss(), 0.0);
        layer.set_training(false);
        assert!(layer.is_training());
        assert_eq!(layer.parameter_names().len(), layer.parameters().len());
    }
}
