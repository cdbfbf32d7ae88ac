//! Named parameter access shared by the model components.
//!
//! Every component lists its tensors under a stable path such as
//! `feature_generation/stage_0/conv/kernel`. The three listings of a group
//! (`named_parameters`, `named_parameters_mut`, `take_gradients`) are always
//! aligned element by element.

use fgcnn_layers::layer::Layer;
use fgcnn_layers::tensor::Tensor;

/// A component owning trainable tensors.
pub trait ParameterGroup {
    /// Parameters with their full names.
    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mutable parameters with their full names.
    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)>;

    /// Gradients from the last backward pass, aligned with the parameters.
    fn take_gradients(&mut self) -> Vec<Option<Tensor>>;

    /// Sum of the regularization losses of the group.
    fn regularization_loss(&self) -> f32;

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }
}

/// Names a layer's parameters as `<prefix>/<short name>`.
pub(crate) fn layer_parameters<'a, L: Layer>(prefix: &str, layer: &'a L) -> Vec<(String, &'a Tensor)> {
    layer
        .parameter_names()
        .into_iter()
        .zip(layer.parameters())
        .map(|(name, t)| (format!("{prefix}/{name}"), t))
        .collect()
}

/// Mutable counterpart of [`layer_parameters`].
pub(crate) fn layer_parameters_mut<'a, L: Layer>(
    prefix: &str,
    layer: &'a mut L,
) -> Vec<(String, &'a mut Tensor)> {
    let names = layer.parameter_names();
    names
        .into_iter()
        .zip(layer.parameters_mut())
        .map(|(name, t)| (format!("{prefix}/{name}"), t))
        .collect()
}
