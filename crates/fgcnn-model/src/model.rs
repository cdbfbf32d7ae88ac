//! Model assembly.
//!
//! [`build_fgcnn`] wires the components together:
//!
//! ```text
//! FeatureBatch ─► InputEmbedding ─┬─ raw [B,F,D] ──────────────────────┐
//!                                 ├─ fg  [B,F,D] ─► FeatureGeneration ─┤ concat (axis 1)
//!                                 │                 [B,G,D]            ▼
//!                                 │                             Interaction ◄─ dense [B,nd]
//!                                 │                                    │
//!                                 └─ linear logit [B,1] ──► PredictionHead ─► [B,1]
//! ```

use std::path::{Path, PathBuf};

use fgcnn_checkpoint::{CheckpointError, Checkpointer, ModelState};
use fgcnn_layers::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::batch::FeatureBatch;
use crate::config::FgcnnConfig;
use crate::error::Result;
use crate::feature::{FeatureSpec, InputSpec};
use crate::feature_generation::FeatureGeneration;
use crate::input_embedding::InputEmbedding;
use crate::interaction::Interaction;
use crate::params::ParameterGroup;
use crate::prediction::PredictionHead;

/// Metadata key holding the serialized [`FgcnnConfig`].
pub const CONFIG_METADATA_KEY: &str = "config";
/// Metadata key holding the serialized [`FeatureSpec`].
pub const FEATURE_SPEC_METADATA_KEY: &str = "feature_spec";
const MODEL_METADATA_KEY: &str = "model";
const MODEL_NAME: &str = "fgcnn";

/// An assembled FGCNN model.
#[derive(Debug, Clone)]
pub struct FGCNN {
    spec: FeatureSpec,
    config: FgcnnConfig,
    inputs: Vec<InputSpec>,
    embedding: InputEmbedding,
    feature_generation: FeatureGeneration,
    interaction: Interaction,
    head: PredictionHead,
}

/// Builds an FGCNN for `spec`.
///
/// The configuration is validated before the feature specification, and
/// both before any parameter is allocated.
///
/// # Example
///
/// ```
/// use fgcnn_model::{build_fgcnn, FeatureBatch, FeatureSpec, FgcnnConfig};
///
/// let spec = FeatureSpec::new().with_sparse("f1", 4).with_sparse("f2", 3).with_dense("f3");
/// let config = FgcnnConfig::new()
///     .with_embedding_size(4)
///     .with_conv_stages(vec![2], vec![2], vec![1])
///     .with_hidden_size(vec![8]);
/// let model = build_fgcnn(&spec, &config).unwrap();
///
/// let batch = FeatureBatch::new(2)
///     .with_sparse("f1", vec![0, 3])
///     .with_sparse("f2", vec![2, 1])
///     .with_dense("f3", vec![0.5, -0.5]);
/// let scores = model.predict(&batch).unwrap();
/// assert_eq!(scores.shape(), &[2, 1]);
/// ```
pub fn build_fgcnn(spec: &FeatureSpec, config: &FgcnnConfig) -> Result<FGCNN> {
    config.validate()?;
    spec.validate()?;

    let embedding = InputEmbedding::new(spec, config)?;
    let num_fields = spec.num_embedded();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let feature_generation = FeatureGeneration::new(num_fields, config, &mut rng)?;
    let interaction = Interaction::new(
        num_fields + feature_generation.generated_len(),
        config.embedding_size,
        spec.dense.len(),
        config.include_self_pairs,
    );
    let head = PredictionHead::new(interaction.output_dim(), config, &mut rng)?;

    let model = FGCNN {
        spec: spec.clone(),
        config: config.clone(),
        inputs: spec.input_specs(),
        embedding,
        feature_generation,
        interaction,
        head,
    };
    tracing::info!(
        fields = spec.num_fields(),
        embedded = num_fields,
        generated = model.feature_generation.generated_len(),
        head_input = model.interaction.output_dim(),
        parameters = model.num_parameters(),
        "Built FGCNN"
    );
    Ok(model)
}

impl FGCNN {
    /// One entry per input field, in sparse, dense, sequence order.
    pub fn inputs(&self) -> &[InputSpec] {
        &self.inputs
    }

    /// Hyperparameters the model was built with.
    pub fn config(&self) -> &FgcnnConfig {
        &self.config
    }

    /// Feature specification the model was built for.
    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Input embedding stores.
    pub fn embedding(&self) -> &InputEmbedding {
        &self.embedding
    }

    /// Number of generated features.
    pub fn generated_len(&self) -> usize {
        self.feature_generation.generated_len()
    }

    /// Width of the prediction head's input.
    pub fn head_input_dim(&self) -> usize {
        self.interaction.output_dim()
    }

    /// Scores `[B, 1]` for a batch.
    pub fn predict(&self, batch: &FeatureBatch) -> Result<Tensor> {
        let embedded = self.embedding.forward(batch)?;
        let generated = self.feature_generation.forward(&embedded.fg)?;
        let combined = Tensor::concat(&[&embedded.raw, &generated], 1);
        let head_input = self.interaction.forward(&combined, embedded.dense.as_ref())?;
        self.head.forward(&head_input, embedded.linear_logit.as_ref())
    }

    /// Forward pass that caches what [`FGCNN::backward`] needs.
    pub fn forward_train(&mut self, batch: &FeatureBatch) -> Result<Tensor> {
        let embedded = self.embedding.forward_train(batch)?;
        let generated = self.feature_generation.forward_train(&embedded.fg)?;
        let combined = Tensor::concat(&[&embedded.raw, &generated], 1);
        let head_input = self
            .interaction
            .forward_train(&combined, embedded.dense.as_ref())?;
        self.head
            .forward_train(&head_input, embedded.linear_logit.as_ref())
    }

    /// Back-propagates `d loss / d prediction` (`[B, 1]`) through every
    /// component. Gradients are collected with
    /// [`ParameterGroup::take_gradients`].
    pub fn backward(&mut self, grad: &Tensor) -> Result<()> {
        let (head_input_grad, logit_grad) = self.head.backward(grad)?;
        let combined_grad = self.interaction.backward(&head_input_grad)?;
        let num_fields = self.spec.num_embedded();
        let parts = combined_grad.split(1, &[num_fields, self.generated_len()]);
        let fg_grad = self.feature_generation.backward(&parts[1])?;
        self.embedding
            .backward(&parts[0], &fg_grad, Some(&logit_grad))
    }

    /// Switches dropout on or off.
    pub fn set_training(&mut self, training: bool) {
        self.head.set_training(training);
    }

    /// Snapshot of every parameter plus the metadata needed to rebuild the
    /// model.
    pub fn state_dict(&self, global_step: u64) -> Result<ModelState> {
        let mut state = ModelState::new(global_step);
        for (name, tensor) in self.named_parameters() {
            state.add_param(name, tensor.shape().to_vec(), tensor.data().to_vec())?;
        }
        let config = serde_json::to_string(&self.config).map_err(CheckpointError::Serialization)?;
        state.set_metadata(CONFIG_METADATA_KEY, config);
        state.set_metadata(FEATURE_SPEC_METADATA_KEY, self.spec.to_json_value().to_string());
        state.set_metadata(MODEL_METADATA_KEY, MODEL_NAME);
        Ok(state)
    }

    /// Copies parameters from `state`.
    ///
    /// Every name and shape is checked before anything is written, so a
    /// failed load leaves the model untouched.
    pub fn load_state_dict(&mut self, state: &ModelState) -> Result<()> {
        let current = self.named_parameters();
        for (name, tensor) in &current {
            let param = state
                .param(name)
                .ok_or_else(|| CheckpointError::MissingParameter(name.clone()))?;
            if param.shape.as_slice() != tensor.shape() {
                return Err(CheckpointError::ShapeMismatch {
                    name: name.clone(),
                    expected: tensor.shape().to_vec(),
                    found: param.shape.clone(),
                }
                .into());
            }
        }
        if current.len() != state.params.len() {
            if let Some(extra) = state
                .params
                .keys()
                .find(|k| !current.iter().any(|(n, _)| n == *k))
            {
                return Err(CheckpointError::UnexpectedParameter(extra.clone()).into());
            }
        }

        for (name, tensor) in self.named_parameters_mut() {
            if let Some(param) = state.param(&name) {
                tensor.data_mut().copy_from_slice(&param.values);
            }
        }
        tracing::debug!(step = state.global_step, params = state.params.len(), "Loaded parameters");
        Ok(())
    }

    /// Writes `checkpoint-<step>.<ext>` into `dir`.
    pub fn save<C: Checkpointer + ?Sized>(
        &self,
        checkpointer: &C,
        dir: &Path,
        global_step: u64,
    ) -> Result<PathBuf> {
        let path = checkpointer.checkpoint_path(dir, global_step);
        checkpointer.save(&path, &self.state_dict(global_step)?)?;
        tracing::info!(path = %path.display(), step = global_step, "Saved model");
        Ok(path)
    }

    /// Rebuilds a model from the config and spec stored in `state`, then
    /// loads its parameters.
    pub fn from_state(state: &ModelState) -> Result<Self> {
        let config_json = state.metadata(CONFIG_METADATA_KEY).ok_or_else(|| {
            CheckpointError::Corrupted(format!("missing metadata '{CONFIG_METADATA_KEY}'"))
        })?;
        let spec_json = state.metadata(FEATURE_SPEC_METADATA_KEY).ok_or_else(|| {
            CheckpointError::Corrupted(format!("missing metadata '{FEATURE_SPEC_METADATA_KEY}'"))
        })?;
        let config = FgcnnConfig::from_json_str(config_json)?;
        let spec = FeatureSpec::from_json_str(spec_json)?;

        let mut model = build_fgcnn(&spec, &config)?;
        model.load_state_dict(state)?;
        Ok(model)
    }

    /// Restores a model from one checkpoint file.
    pub fn load<C: Checkpointer + ?Sized>(checkpointer: &C, path: &Path) -> Result<Self> {
        let state = checkpointer.restore(path)?;
        let model = Self::from_state(&state)?;
        tracing::info!(path = %path.display(), step = state.global_step, "Loaded model");
        Ok(model)
    }
}

impl ParameterGroup for FGCNN {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = self.embedding.named_parameters();
        params.extend(self.feature_generation.named_parameters());
        params.extend(self.head.named_parameters());
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = self.embedding.named_parameters_mut();
        params.extend(self.feature_generation.named_parameters_mut());
        params.extend(self.head.named_parameters_mut());
        params
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let mut grads = self.embedding.take_gradients();
        grads.extend(self.feature_generation.take_gradients());
        grads.extend(self.head.take_gradients());
        grads
    }

    fn regularization_loss(&self) -> f32 {
        self.embedding.regularization_loss()
            + self.feature_generation.regularization_loss()
            + self.head.regularization_loss()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgcnn_layers::sequence_pooling::PoolingMode;

    use crate::batch::SequenceInput;
    use crate::error::FgcnnError;

    fn small_config() -> FgcnnConfig {
        FgcnnConfig::new()
            .with_embedding_size(3)
            .with_conv_stages(vec![2], vec![2], vec![2])
            .with_hidden_size(vec![4])
    }

    fn spec() -> FeatureSpec {
        FeatureSpec::new()
            .with_sparse("a", 5)
            .with_sparse("b", 4)
            .with_dense("d")
            .with_sequence("s", 6, 3, PoolingMode::Sum)
    }

    fn batch() -> FeatureBatch {
        FeatureBatch::new(2)
            .with_sparse("a", vec![1, 4])
            .with_sparse("b", vec![0, 3])
            .with_dense("d", vec![0.2, -0.7])
            .with_sequence("s", SequenceInput::from_ragged(&[vec![1, 5], vec![2, 2, 2, 2]], 3))
    }

    #[test]
    fn test_component_sizes() {
        let model = build_fgcnn(&spec(), &small_config()).unwrap();
        // 3 embedded fields pool to 1, with 2 new maps.
        assert_eq!(model.generated_len(), 2);
        // 5 combined features: 15 flat + 10 pairs + 1 dense.
        assert_eq!(model.head_input_dim(), 26);
        assert_eq!(model.inputs().len(), 4);
    }

    #[test]
    fn test_parameter_names_are_unique() {
        let model = build_fgcnn(&spec(), &small_config().with_linear_logit(true)).unwrap();
        let names: Vec<String> = model.named_parameters().into_iter().map(|(n, _)| n).collect();
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.contains(&"raw/embedding/a".to_string()));
        assert!(names.contains(&"fg/embedding/s".to_string()));
        assert!(names.contains(&"linear/dense/kernel".to_string()));
        assert!(names.contains(&"prediction/bias".to_string()));
    }

    #[test]
    fn test_gradients_align_with_parameters() {
        let mut model = build_fgcnn(&spec(), &small_config().with_linear_logit(true)).unwrap();
        let out = model.forward_train(&batch()).unwrap();
        model.backward(&Tensor::ones(out.shape())).unwrap();
        let grads = model.take_gradients();
        let params = model.named_parameters();
        assert_eq!(grads.len(), params.len());
        for ((name, p), g) in params.iter().zip(&grads) {
            let g = g.as_ref().unwrap_or_else(|| panic!("no gradient for {name}"));
            assert_eq!(g.shape(), p.shape(), "{name}");
        }
    }

    #[test]
    fn test_load_state_dict_checks_before_writing() {
        let mut model = build_fgcnn(&spec(), &small_config()).unwrap();
        let before = model.predict(&batch()).unwrap();

        let mut state = model.state_dict(0).unwrap();
        state.params.remove("prediction/bias");
        let err = model.load_state_dict(&state).unwrap_err();
        assert!(matches!(err, FgcnnError::Checkpoint(CheckpointError::MissingParameter(_))));

        let mut state = model.state_dict(0).unwrap();
        state.add_param("extra", vec![1], vec![0.0]).unwrap();
        let err = model.load_state_dict(&state).unwrap_err();
        assert!(matches!(err, FgcnnError::Checkpoint(CheckpointError::UnexpectedParameter(_))));

        let mut state = model.state_dict(0).unwrap();
        state.add_param("prediction/bias", vec![2], vec![9.0, 9.0]).unwrap();
        assert!(model.load_state_dict(&state).is_err());

        assert_eq!(model.predict(&batch()).unwrap(), before);
    }

    #[test]
    fn test_from_state_restores_predictions() {
        let mut model = build_fgcnn(&spec(), &small_config()).unwrap();
        for (_, t) in model.named_parameters_mut() {
            t.data_mut().iter_mut().for_each(|v| *v += 0.01);
        }
        let state = model.state_dict(3).unwrap();
        let restored = FGCNN::from_state(&state).unwrap();
        assert_eq!(restored.predict(&batch()).unwrap(), model.predict(&batch()).unwrap());
        assert_eq!(restored.config(), model.config());
    }

    #[test]
    fn test_from_state_requires_metadata() {
        let model = build_fgcnn(&spec(), &small_config()).unwrap();
        let mut state = model.state_dict(0).unwrap();
        state.metadata.remove(CONFIG_METADATA_KEY);
        assert!(FGCNN::from_state(&state).is_err());
    }
}
