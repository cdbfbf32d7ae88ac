//! Convolutional feature generation.
//!
//! The `fg` embeddings `[B, F, D]` are read as a one-channel image
//! `[B, F, D, 1]`. Each stage runs a `(kernel_width, 1)` tanh convolution
//! along the field axis, max-pools `(pooling_width, 1)`, then recombines the
//! pooled map with a tanh dense layer into `L' * new_maps` generated
//! features of width `D`. The next stage consumes the pooled map.

use fgcnn_layers::activation::{ActivationLayer, ActivationType};
use fgcnn_layers::conv::{Conv2D, Conv2DConfig};
use fgcnn_layers::dense::Dense;
use fgcnn_layers::layer::Layer;
use fgcnn_layers::pooling::MaxPooling2D;
use fgcnn_layers::tensor::Tensor;
use fgcnn_layers::LayerError;
use rand::rngs::StdRng;

use crate::config::FgcnnConfig;
use crate::error::Result;
use crate::params::{layer_parameters, layer_parameters_mut, ParameterGroup};

#[derive(Debug, Clone)]
struct Stage {
    conv: Conv2D,
    pool: MaxPooling2D,
    dense: Dense,
    activation: ActivationLayer,
    /// Field-axis length after pooling
    pooled_len: usize,
    filters: usize,
    new_maps: usize,
}

impl Stage {
    fn generated_len(&self) -> usize {
        self.pooled_len * self.new_maps
    }
}

/// The stack of feature generation stages.
#[derive(Debug, Clone)]
pub struct FeatureGeneration {
    stages: Vec<Stage>,
    num_fields: usize,
    dim: usize,
}

impl FeatureGeneration {
    /// Builds the stages for `num_fields` embedded fields.
    ///
    /// Once the field axis is shorter than the pooling window, pooling
    /// leaves nothing to recombine: that stage and every later one generate
    /// no features and are not built.
    pub fn new(num_fields: usize, config: &FgcnnConfig, rng: &mut StdRng) -> Result<Self> {
        let dim = config.embedding_size;
        let pool_size = (config.pooling_width, 1);

        let mut stages = Vec::with_capacity(config.num_stages());
        let mut len = num_fields;
        let mut channels = 1;
        for i in 0..config.num_stages() {
            if len < config.pooling_width {
                tracing::warn!(
                    stage = i,
                    fields = len,
                    pooling_width = config.pooling_width,
                    skipped = config.num_stages() - i,
                    "Field axis shorter than pooling window, remaining stages generate nothing"
                );
                break;
            }
            let (kernel_width, filters, new_maps) = (
                config.conv_kernel_width[i],
                config.conv_filters[i],
                config.new_maps[i],
            );
            let conv = Conv2DConfig::new(channels, filters, (kernel_width, 1))
                .with_activation(ActivationType::Tanh)
                .build(rng)?;
            let pool = MaxPooling2D::new(pool_size)?;
            let (pooled_len, _) = pool.output_size(len, dim)?;
            let dense = Dense::new(pooled_len * dim * filters, pooled_len * dim * new_maps, rng)?;

            tracing::debug!(stage = i, input_len = len, pooled_len, filters, new_maps, "Built stage");
            stages.push(Stage {
                conv,
                pool,
                dense,
                activation: ActivationLayer::from_activation_type(ActivationType::Tanh),
                pooled_len,
                filters,
                new_maps,
            });
            len = pooled_len;
            channels = filters;
        }

        Ok(Self {
            stages,
            num_fields,
            dim,
        })
    }

    /// Number of stages.
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Total number of generated features, `sum(L'_i * new_maps_i)`.
    pub fn generated_len(&self) -> usize {
        self.stages.iter().map(Stage::generated_len).sum()
    }

    fn check_input(&self, input: &Tensor) -> Result<usize> {
        let s = input.shape();
        if s.len() != 3 || s[1] != self.num_fields || s[2] != self.dim {
            return Err(LayerError::ShapeMismatch {
                expected: vec![s.first().copied().unwrap_or(0), self.num_fields, self.dim],
                actual: s.to_vec(),
            }
            .into());
        }
        Ok(s[0])
    }

    fn concat_generated(&self, b: usize, generated: Vec<Tensor>) -> Tensor {
        if generated.is_empty() {
            return Tensor::zeros(&[b, 0, self.dim]);
        }
        let refs: Vec<&Tensor> = generated.iter().collect();
        Tensor::concat(&refs, 1)
    }

    /// Generated features `[B, generated_len, D]` for `fg` embeddings `[B, F, D]`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let b = self.check_input(input)?;
        let mut x = input.reshape(&[b, self.num_fields, self.dim, 1]);
        let mut generated = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let pooled = stage.pool.forward(&stage.conv.forward(&x)?)?;
            let flat = pooled.reshape(&[b, stage.pooled_len * self.dim * stage.filters]);
            let new = stage.activation.forward(&stage.dense.forward(&flat)?)?;
            generated.push(new.reshape(&[b, stage.generated_len(), self.dim]));
            x = pooled;
        }
        Ok(self.concat_generated(b, generated))
    }

    /// Training variant of [`FeatureGeneration::forward`].
    pub fn forward_train(&mut self, input: &Tensor) -> Result<Tensor> {
        let b = self.check_input(input)?;
        let dim = self.dim;
        let mut x = input.reshape(&[b, self.num_fields, dim, 1]);
        let mut generated = Vec::with_capacity(self.stages.len());
        for stage in &mut self.stages {
            let conv = stage.conv.forward_train(&x)?;
            let pooled = stage.pool.forward_train(&conv)?;
            let flat = pooled.reshape(&[b, stage.pooled_len * dim * stage.filters]);
            let new = stage.dense.forward_train(&flat)?;
            let new = stage.activation.forward_train(&new)?;
            generated.push(new.reshape(&[b, stage.generated_len(), dim]));
            x = pooled;
        }
        Ok(self.concat_generated(b, generated))
    }

    /// Back-propagates `[B, generated_len, D]`, returning the gradient for
    /// the `fg` embeddings `[B, F, D]`.
    pub fn backward(&mut self, grad: &Tensor) -> Result<Tensor> {
        let s = grad.shape();
        if s.len() != 3 || s[1] != self.generated_len() || s[2] != self.dim {
            return Err(LayerError::ShapeMismatch {
                expected: vec![s.first().copied().unwrap_or(0), self.generated_len(), self.dim],
                actual: s.to_vec(),
            }
            .into());
        }
        let b = s[0];
        if self.stages.is_empty() {
            return Ok(Tensor::zeros(&[b, self.num_fields, self.dim]));
        }

        let sizes: Vec<usize> = self.stages.iter().map(Stage::generated_len).collect();
        let parts = grad.split(1, &sizes);
        let dim = self.dim;

        // Gradient w.r.t. a stage's pooled output arriving from the next stage.
        let mut carry: Option<Tensor> = None;
        for (stage, part) in self.stages.iter_mut().zip(parts).rev() {
            let g = part.reshape(&[b, stage.generated_len() * dim]);
            let g = stage.activation.backward(&g)?;
            let g = stage.dense.backward(&g)?;
            let mut g = g.reshape(&[b, stage.pooled_len, dim, stage.filters]);
            if let Some(next) = &carry {
                g.add_assign(next);
            }
            let g = stage.pool.backward(&g)?;
            carry = Some(stage.conv.backward(&g)?);
        }

        let input_grad = carry.unwrap_or_else(|| Tensor::zeros(&[b, self.num_fields, dim, 1]));
        Ok(input_grad.reshape(&[b, self.num_fields, dim]))
    }
}

impl ParameterGroup for FeatureGeneration {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = Vec::new();
        for (i, stage) in self.stages.iter().enumerate() {
            params.extend(layer_parameters(&format!("feature_generation/stage_{i}/conv"), &stage.conv));
            params.extend(layer_parameters(&format!("feature_generation/stage_{i}/dense"), &stage.dense));
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = Vec::new();
        for (i, stage) in self.stages.iter_mut().enumerate() {
            params.extend(layer_parameters_mut(
                &format!("feature_generation/stage_{i}/conv"),
                &mut stage.conv,
            ));
            params.extend(layer_parameters_mut(
                &format!("feature_generation/stage_{i}/dense"),
                &mut stage.dense,
            ));
        }
        params
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let mut grads = Vec::new();
        for stage in &mut self.stages {
            grads.extend(stage.conv.take_gradients());
            grads.extend(stage.dense.take_gradients());
        }
        grads
    }

    fn regularization_loss(&self) -> f32 {
        self.stages
            .iter()
            .map(|s| s.conv.regularization_loss() + s.dense.regularization_loss())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn config(kernel_width: Vec<usize>, filters: Vec<usize>, new_maps: Vec<usize>) -> FgcnnConfig {
        FgcnnConfig::new()
            .with_embedding_size(3)
            .with_conv_stages(kernel_width, filters, new_maps)
            .with_pooling_width(2)
    }

    #[test]
    fn test_generated_len_two_stages() {
        // 5 fields -> pooled 2 -> pooled 1
        let fg = FeatureGeneration::new(5, &config(vec![3, 2], vec![2, 2], vec![2, 3]), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(fg.num_stages(), 2);
        assert_eq!(fg.generated_len(), 2 * 2 + 3);

        let out = fg.forward(&Tensor::ones(&[4, 5, 3])).unwrap();
        assert_eq!(out.shape(), &[4, 7, 3]);
        assert!(out.data().iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_stages_past_exhausted_fields_are_skipped() {
        // 3 fields -> pooled 1; the second stage cannot pool a single field.
        let fg = FeatureGeneration::new(3, &config(vec![2, 2], vec![2, 2], vec![1, 1]), &mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_eq!(fg.num_stages(), 1);
        assert_eq!(fg.generated_len(), 1);
        assert_eq!(fg.named_parameters().len(), 4);

        // A single field cannot be pooled at all.
        let fg = FeatureGeneration::new(1, &config(vec![2], vec![2], vec![1]), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(fg.num_stages(), 0);
        assert_eq!(fg.forward(&Tensor::ones(&[2, 1, 3])).unwrap().shape(), &[2, 0, 3]);
    }

    #[test]
    fn test_zero_stages() {
        let mut fg = FeatureGeneration::new(2, &config(vec![], vec![], vec![]), &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(fg.generated_len(), 0);
        let out = fg.forward_train(&Tensor::ones(&[2, 2, 3])).unwrap();
        assert_eq!(out.shape(), &[2, 0, 3]);
        let grad = fg.backward(&out).unwrap();
        assert_eq!(grad.shape(), &[2, 2, 3]);
        assert!(fg.named_parameters().is_empty());
    }

    #[test]
    fn test_backward_shapes_and_names() {
        let mut fg = FeatureGeneration::new(4, &config(vec![2, 2], vec![3, 2], vec![1, 2]), &mut StdRng::seed_from_u64(1))
            .unwrap();
        let input = Tensor::from_data(&[2, 4, 3], (0..24).map(|v| v as f32 * 0.05).collect());
        let out = fg.forward_train(&input).unwrap();
        let grad = fg.backward(&Tensor::ones(out.shape())).unwrap();
        assert_eq!(grad.shape(), &[2, 4, 3]);
        assert!(grad.data().iter().any(|&g| g != 0.0));

        let names: Vec<String> = fg.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "feature_generation/stage_0/conv/kernel");
        assert_eq!(names[3], "feature_generation/stage_0/dense/bias");
        assert_eq!(names.len(), 8);
        let grads = fg.take_gradients();
        assert_eq!(grads.len(), 8);
        assert!(grads.iter().all(Option::is_some));
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let cfg = config(vec![2], vec![2], vec![1]);
        let mut fg = FeatureGeneration::new(2, &cfg, &mut StdRng::seed_from_u64(3)).unwrap();
        let input = Tensor::from_data(&[1, 2, 3], vec![0.1, -0.2, 0.3, 0.05, 0.4, -0.1]);
        fg.forward_train(&input).unwrap();
        let analytic = fg.backward(&Tensor::ones(&[1, 1, 3])).unwrap();

        let eps = 1e-3;
        for k in 0..input.numel() {
            let mut plus = input.clone();
            plus.data_mut()[k] += eps;
            let mut minus = input.clone();
            minus.data_mut()[k] -= eps;
            let numeric = (fg.forward(&plus).unwrap().sum() - fg.forward(&minus).unwrap().sum()) / (2.0 * eps);
            assert!((numeric - analytic.data()[k]).abs() < 1e-2, "k={k}: {numeric} vs {}", analytic.data()[k]);
        }
    }
}
