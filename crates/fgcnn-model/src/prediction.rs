//! Prediction head: hidden MLP, a single-unit output projection and the
//! output activation.

use fgcnn_layers::activation::{ActivationLayer, ActivationType};
use fgcnn_layers::dense::Dense;
use fgcnn_layers::initializer::Initializer;
use fgcnn_layers::layer::Layer;
use fgcnn_layers::mlp::{MLPConfig, MLP};
use fgcnn_layers::regularizer::Regularizer;
use fgcnn_layers::tensor::Tensor;
use fgcnn_layers::LayerError;
use rand::rngs::StdRng;

use crate::config::FgcnnConfig;
use crate::error::Result;
use crate::params::{layer_parameters, layer_parameters_mut, ParameterGroup};

/// Adds a learned scalar bias to the logit and applies the output
/// activation.
#[derive(Debug, Clone)]
pub struct PredictionLayer {
    bias: Tensor,
    bias_grad: Option<Tensor>,
    activation: ActivationLayer,
}

impl PredictionLayer {
    /// Creates the layer with a zero bias.
    pub fn new(activation: ActivationType) -> Self {
        Self {
            bias: Tensor::zeros(&[1]),
            bias_grad: None,
            activation: ActivationLayer::from_activation_type(activation),
        }
    }

    /// Performs forward pass and caches the activation output.
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor, LayerError> {
        let shifted = input.add(&self.bias);
        self.activation.forward_train(&shifted)
    }
}

impl Layer for PredictionLayer {
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        self.activation.forward(&input.add(&self.bias))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        let g = self.activation.backward(grad)?;
        self.bias_grad = Some(Tensor::from_data(&[1], vec![g.sum()]));
        Ok(g)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.bias]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.bias]
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        vec!["bias"]
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        vec![self.bias_grad.take()]
    }

    fn name(&self) -> &str {
        "PredictionLayer"
    }
}

/// MLP (optional), output projection and [`PredictionLayer`].
#[derive(Debug, Clone)]
pub struct PredictionHead {
    mlp: Option<MLP>,
    output: Dense,
    prediction: PredictionLayer,
}

impl PredictionHead {
    /// Builds the head for an `input_dim`-wide input.
    ///
    /// An empty `hidden_size` skips the MLP and projects the input directly.
    pub fn new(input_dim: usize, config: &FgcnnConfig, rng: &mut StdRng) -> Result<Self> {
        let mlp = if config.hidden_size.is_empty() {
            None
        } else {
            let mlp_config = config
                .hidden_size
                .iter()
                .fold(MLPConfig::new(input_dim), |c, &width| {
                    c.add_layer(width, config.hidden_activation)
                })
                .with_kernel_initializer(Initializer::GlorotNormal)
                .with_kernel_regularizer(Regularizer::l2(config.l2_reg_deep))
                .with_dropout(config.dropout_rate())
                .with_seed(config.seed);
            Some(mlp_config.build(rng)?)
        };
        let hidden_out = config.hidden_size.last().copied().unwrap_or(input_dim);
        let output = Dense::new_no_bias(hidden_out, 1, rng)?;

        Ok(Self {
            mlp,
            output,
            prediction: PredictionLayer::new(config.final_activation),
        })
    }

    /// `[B, 1]` prediction; `linear_logit` is added before the bias.
    pub fn forward(&self, input: &Tensor, linear_logit: Option<&Tensor>) -> Result<Tensor> {
        let hidden = match &self.mlp {
            Some(mlp) => mlp.forward(input)?,
            None => input.clone(),
        };
        let mut logit = self.output.forward(&hidden)?;
        if let Some(linear) = linear_logit {
            logit = logit.add(linear);
        }
        Ok(self.prediction.forward(&logit)?)
    }

    /// Training variant of [`PredictionHead::forward`].
    pub fn forward_train(&mut self, input: &Tensor, linear_logit: Option<&Tensor>) -> Result<Tensor> {
        let hidden = match &mut self.mlp {
            Some(mlp) => mlp.forward_train(input)?,
            None => input.clone(),
        };
        let mut logit = self.output.forward_train(&hidden)?;
        if let Some(linear) = linear_logit {
            logit = logit.add(linear);
        }
        Ok(self.prediction.forward_train(&logit)?)
    }

    /// Back-propagates `d loss / d prediction`.
    ///
    /// Returns the gradient for the head input and for the logit, the latter
    /// being what the linear logit receives.
    pub fn backward(&mut self, grad: &Tensor) -> Result<(Tensor, Tensor)> {
        let logit_grad = self.prediction.backward(grad)?;
        let mut input_grad = self.output.backward(&logit_grad)?;
        if let Some(mlp) = &mut self.mlp {
            input_grad = mlp.backward(&input_grad)?;
        }
        Ok((input_grad, logit_grad))
    }

    /// Switches dropout on or off.
    pub fn set_training(&mut self, training: bool) {
        if let Some(mlp) = &mut self.mlp {
            mlp.set_training(training);
        }
    }
}

impl ParameterGroup for PredictionHead {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = Vec::new();
        if let Some(mlp) = &self.mlp {
            for (i, dense) in mlp.dense_layers().enumerate() {
                params.extend(layer_parameters(&format!("prediction/mlp/dense_{i}"), dense));
            }
        }
        params.extend(layer_parameters("prediction/output", &self.output));
        params.extend(layer_parameters("prediction", &self.prediction));
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = Vec::new();
        if let Some(mlp) = &mut self.mlp {
            for (i, dense) in mlp.dense_layers_mut().enumerate() {
                params.extend(layer_parameters_mut(&format!("prediction/mlp/dense_{i}"), dense));
            }
        }
        params.extend(layer_parameters_mut("prediction/output", &mut self.output));
        params.extend(layer_parameters_mut("prediction", &mut self.prediction));
        params
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let mut grads = match &mut self.mlp {
            Some(mlp) => mlp.take_gradients(),
            None => Vec::new(),
        };
        grads.extend(self.output.take_gradients());
        grads.extend(self.prediction.take_gradients());
        grads
    }

    fn regularization_loss(&self) -> f32 {
        self.mlp.as_ref().map_or(0.0, |m| m.regularization_loss()) + self.output.regularization_loss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_prediction_layer_bias_and_sigmoid() {
        let mut layer = PredictionLayer::new(ActivationType::Sigmoid);
        layer.parameters_mut()[0].data_mut()[0] = 1.0;
        let out = layer.forward(&Tensor::from_data(&[2, 1], vec![-1.0, 0.0])).unwrap();
        assert_relative_eq!(out.data()[0], 0.5);
        assert_relative_eq!(out.data()[1], 1.0 / (1.0 + (-1.0f32).exp()), epsilon = 1e-6);
    }

    #[test]
    fn test_prediction_layer_bias_grad() {
        let mut layer = PredictionLayer::new(ActivationType::Linear);
        layer.forward_train(&Tensor::zeros(&[3, 1])).unwrap();
        layer.backward(&Tensor::from_data(&[3, 1], vec![1.0, 2.0, 3.0])).unwrap();
        let grads = layer.take_gradients();
        assert_eq!(grads[0].as_ref().unwrap().data(), &[6.0]);
    }

    #[test]
    fn test_head_names_and_output() {
        let config = FgcnnConfig::new().with_hidden_size(vec![4, 3]);
        let head = PredictionHead::new(5, &config, &mut StdRng::seed_from_u64(0)).unwrap();
        let out = head.forward(&Tensor::ones(&[2, 5]), None).unwrap();
        assert_eq!(out.shape(), &[2, 1]);
        assert!(out.data().iter().all(|p| (0.0..=1.0).contains(p)));

        let names: Vec<String> = head.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![
                "prediction/mlp/dense_0/kernel",
                "prediction/mlp/dense_0/bias",
                "prediction/mlp/dense_1/kernel",
                "prediction/mlp/dense_1/bias",
                "prediction/output/kernel",
                "prediction/bias",
            ]
        );
    }

    #[test]
    fn test_head_without_hidden_layers() {
        let config = FgcnnConfig::new().with_hidden_size(vec![]);
        let mut head = PredictionHead::new(3, &config, &mut StdRng::seed_from_u64(0)).unwrap();
        let linear = Tensor::from_data(&[1, 1], vec![100.0]);
        let out = head.forward_train(&Tensor::zeros(&[1, 3]), Some(&linear)).unwrap();
        assert_relative_eq!(out.data()[0], 1.0, epsilon = 1e-6);

        let (input_grad, logit_grad) = head.backward(&Tensor::ones(&[1, 1])).unwrap();
        assert_eq!(input_grad.shape(), &[1, 3]);
        assert_eq!(logit_grad.shape(), &[1, 1]);
        assert_eq!(head.take_gradients().len(), 2);
    }
}
