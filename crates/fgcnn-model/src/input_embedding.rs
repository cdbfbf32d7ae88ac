//! Input embedding builder.
//!
//! Turns a [`FeatureBatch`] into the two embedding sequences the model
//! consumes (`raw` for the interaction path, `fg` for feature generation)
//! and, when enabled, the linear logit. The two stores are built from the
//! same field list but own disjoint tables.

use fgcnn_layers::dense::Dense;
use fgcnn_layers::embedding::EmbeddingTable;
use fgcnn_layers::initializer::Initializer;
use fgcnn_layers::layer::Layer;
use fgcnn_layers::regularizer::Regularizer;
use fgcnn_layers::sequence_pooling::SequencePooling;
use fgcnn_layers::tensor::Tensor;
use fgcnn_layers::LayerError;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::batch::FeatureBatch;
use crate::config::FgcnnConfig;
use crate::error::{FgcnnError, Result};
use crate::feature::{DenseFeature, FeatureSpec};
use crate::params::{layer_parameters, layer_parameters_mut, ParameterGroup};

#[derive(Debug, Clone)]
struct SequenceSlot {
    max_len: usize,
    pooling: SequencePooling,
}

#[derive(Debug, Clone)]
struct EmbeddedField {
    name: String,
    table: EmbeddingTable,
    sequence: Option<SequenceSlot>,
}

fn lookup_error(field: &str) -> impl Fn(LayerError) -> FgcnnError + '_ {
    move |e| match e {
        LayerError::IdOutOfRange { id, cardinality } => {
            FgcnnError::input(field, format!("id {id} out of range [0, {cardinality})"))
        }
        other => FgcnnError::Layer(other),
    }
}

/// Ids to look up for a padded sequence: positions past the (clamped)
/// length read row 0 and are masked out by the pooling.
fn masked_ids(name: &str, ids: &[usize], lengths: &[usize], max_len: usize) -> Vec<usize> {
    if lengths.iter().any(|&l| l > max_len) {
        tracing::warn!(
            field = name,
            max_len,
            longest = lengths.iter().copied().max().unwrap_or(0),
            "Sequence lengths above max_len clamped"
        );
    }
    ids.chunks(max_len)
        .zip(lengths)
        .flat_map(|(row, &len)| {
            let len = len.min(max_len);
            row.iter()
                .enumerate()
                .map(move |(p, &id)| if p < len { id } else { 0 })
        })
        .collect()
}

/// Embedding tables for every sparse and sequence field, in field order.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    prefix: String,
    dim: usize,
    fields: Vec<EmbeddedField>,
}

impl EmbeddingStore {
    /// Creates one `[cardinality, dim]` table per embedded field.
    pub fn new(
        prefix: impl Into<String>,
        spec: &FeatureSpec,
        dim: usize,
        initializer: Initializer,
        regularizer: Regularizer,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let mut fields = Vec::with_capacity(spec.num_embedded());
        for f in &spec.sparse {
            let table = EmbeddingTable::new(f.cardinality, dim, initializer, rng)?
                .with_regularizer(regularizer);
            fields.push(EmbeddedField {
                name: f.name.clone(),
                table,
                sequence: None,
            });
        }
        for f in &spec.sequence {
            let table = EmbeddingTable::new(f.cardinality, dim, initializer, rng)?
                .with_regularizer(regularizer);
            fields.push(EmbeddedField {
                name: f.name.clone(),
                table,
                sequence: Some(SequenceSlot {
                    max_len: f.max_len,
                    pooling: SequencePooling::new(f.combiner),
                }),
            });
        }
        Ok(Self {
            prefix: prefix.into(),
            dim,
            fields,
        })
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of embedded fields.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Field names in embedding order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// The table of one field.
    pub fn table(&self, name: &str) -> Option<&EmbeddingTable> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.table)
    }

    /// Embeds every field, giving `[batch, num_fields, dim]`.
    pub fn embed(&self, batch: &FeatureBatch) -> Result<Tensor> {
        let b = batch.batch_size();
        let mut columns = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let name = field.name.as_str();
            let column = match &field.sequence {
                None => {
                    let ids = batch.require_sparse(name)?;
                    field.table.lookup(ids).map_err(lookup_error(name))?
                }
                Some(slot) => {
                    let input = batch.require_sequence(name, slot.max_len)?;
                    let ids = masked_ids(name, input.ids(), input.lengths(), slot.max_len);
                    let rows = field.table.lookup(&ids).map_err(lookup_error(name))?;
                    slot.pooling
                        .pool(&rows.reshape(&[b, slot.max_len, self.dim]), input.lengths())?
                }
            };
            columns.push(column);
        }
        Ok(Tensor::stack_dim1(&columns))
    }

    /// Training variant of [`EmbeddingStore::embed`]; caches ids and
    /// pooling state and drops gradients not yet collected.
    pub fn embed_train(&mut self, batch: &FeatureBatch) -> Result<Tensor> {
        let b = batch.batch_size();
        let dim = self.dim;
        let mut columns = Vec::with_capacity(self.fields.len());
        for field in &mut self.fields {
            field.table.clear_cache();
            let name = field.name.as_str();
            let column = match &mut field.sequence {
                None => {
                    let ids = batch.require_sparse(name)?;
                    field.table.lookup_train(ids).map_err(lookup_error(name))?
                }
                Some(slot) => {
                    let input = batch.require_sequence(name, slot.max_len)?;
                    let ids = masked_ids(name, input.ids(), input.lengths(), slot.max_len);
                    let rows = field.table.lookup_train(&ids).map_err(lookup_error(name))?;
                    slot.pooling
                        .pool_train(&rows.reshape(&[b, slot.max_len, dim]), input.lengths())?
                }
            };
            columns.push(column);
        }
        Ok(Tensor::stack_dim1(&columns))
    }

    /// Scatters the `[batch, num_fields, dim]` output gradient into the tables.
    pub fn backward(&mut self, grad: &Tensor) -> Result<()> {
        let n = self.fields.len();
        if grad.ndim() != 3 || grad.shape()[1] != n || grad.shape()[2] != self.dim {
            return Err(LayerError::ShapeMismatch {
                expected: vec![grad.shape().first().copied().unwrap_or(0), n, self.dim],
                actual: grad.shape().to_vec(),
            }
            .into());
        }
        let b = grad.shape()[0];
        let parts = grad.split(1, &vec![1; n]);
        for (field, part) in self.fields.iter_mut().zip(parts) {
            let part = part.reshape(&[b, self.dim]);
            match &mut field.sequence {
                None => field.table.accumulate_grad(&part)?,
                Some(slot) => {
                    let positions = slot.pooling.backward(&part)?;
                    field
                        .table
                        .accumulate_grad(&positions.reshape(&[b * slot.max_len, self.dim]))?;
                }
            }
        }
        Ok(())
    }
}

impl ParameterGroup for EmbeddingStore {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.fields
            .iter()
            .map(|f| (format!("{}/embedding/{}", self.prefix, f.name), f.table.table()))
            .collect()
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let prefix = &self.prefix;
        self.fields
            .iter_mut()
            .flat_map(|f| {
                let name = format!("{prefix}/embedding/{}", f.name);
                f.table.parameters_mut().into_iter().map(move |t| (name.clone(), t))
            })
            .collect()
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        self.fields
            .iter_mut()
            .flat_map(|f| f.table.take_gradients())
            .collect()
    }

    fn regularization_loss(&self) -> f32 {
        self.fields
            .iter()
            .map(|f| f.table.regularization_loss())
            .sum()
    }
}

/// First-order term: a scalar weight per id of every embedded field plus a
/// bias-free linear map of the dense values.
#[derive(Debug, Clone)]
pub struct LinearLogit {
    weights: EmbeddingStore,
    dense: Option<Dense>,
}

impl LinearLogit {
    /// Creates the term for `spec`.
    pub fn new(
        spec: &FeatureSpec,
        initializer: Initializer,
        regularizer: Regularizer,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let weights = EmbeddingStore::new("linear", spec, 1, initializer, regularizer, rng)?;
        let dense = if spec.dense.is_empty() {
            None
        } else {
            Some(Dense::new_no_bias(spec.dense.len(), 1, rng)?.with_kernel_regularizer(regularizer))
        };
        Ok(Self { weights, dense })
    }

    fn combine(weights: Tensor, dense: Option<Tensor>) -> Tensor {
        let b = weights.shape()[0];
        let n = weights.shape()[1];
        let sparse = weights.reshape(&[b, n]).sum_axis(1).reshape(&[b, 1]);
        match dense {
            Some(d) => sparse.add(&d),
            None => sparse,
        }
    }

    /// `[batch, 1]` logit.
    pub fn forward(&self, batch: &FeatureBatch, dense: Option<&Tensor>) -> Result<Tensor> {
        let weights = self.weights.embed(batch)?;
        let dense = match (&self.dense, dense) {
            (Some(layer), Some(values)) => Some(layer.forward(values)?),
            _ => None,
        };
        Ok(Self::combine(weights, dense))
    }

    /// Training variant of [`LinearLogit::forward`].
    pub fn forward_train(&mut self, batch: &FeatureBatch, dense: Option<&Tensor>) -> Result<Tensor> {
        let weights = self.weights.embed_train(batch)?;
        let dense = match (&mut self.dense, dense) {
            (Some(layer), Some(values)) => Some(layer.forward_train(values)?),
            _ => None,
        };
        Ok(Self::combine(weights, dense))
    }

    /// Back-propagates the `[batch, 1]` logit gradient.
    pub fn backward(&mut self, grad: &Tensor) -> Result<()> {
        let b = grad.shape()[0];
        let n = self.weights.num_fields();
        let mut spread = Vec::with_capacity(b * n);
        for &g in grad.data() {
            spread.extend(std::iter::repeat(g).take(n));
        }
        self.weights.backward(&Tensor::from_data(&[b, n, 1], spread))?;
        if let Some(dense) = &mut self.dense {
            dense.backward(grad)?;
        }
        Ok(())
    }
}

impl ParameterGroup for LinearLogit {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = self.weights.named_parameters();
        if let Some(dense) = &self.dense {
            params.extend(layer_parameters("linear/dense", dense));
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = self.weights.named_parameters_mut();
        if let Some(dense) = &mut self.dense {
            params.extend(layer_parameters_mut("linear/dense", dense));
        }
        params
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let mut grads = self.weights.take_gradients();
        if let Some(dense) = &mut self.dense {
            grads.extend(dense.take_gradients());
        }
        grads
    }

    fn regularization_loss(&self) -> f32 {
        self.weights.regularization_loss()
            + self.dense.as_ref().map_or(0.0, |d| d.regularization_loss())
    }
}

/// Everything the embedding builder produces for one batch.
#[derive(Debug, Clone)]
pub struct EmbeddedInputs {
    /// `[batch, fields, dim]` for the interaction path
    pub raw: Tensor,
    /// `[batch, fields, dim]` for feature generation
    pub fg: Tensor,
    /// `[batch, dense fields]`, if the spec has dense fields
    pub dense: Option<Tensor>,
    /// `[batch, 1]`, if the linear logit is enabled
    pub linear_logit: Option<Tensor>,
}

/// The raw and fg embedding stores plus the optional linear logit.
#[derive(Debug, Clone)]
pub struct InputEmbedding {
    raw: EmbeddingStore,
    fg: EmbeddingStore,
    linear: Option<LinearLogit>,
    dense_fields: Vec<DenseFeature>,
}

impl InputEmbedding {
    /// Builds the stores.
    ///
    /// Each store draws from its own generator seeded with `config.seed`, so
    /// `raw` and `fg` start from equal values while owning separate tensors.
    pub fn new(spec: &FeatureSpec, config: &FgcnnConfig) -> Result<Self> {
        let initializer = Initializer::RandomNormal {
            mean: 0.0,
            std: config.init_std,
        };
        let embedding_reg = Regularizer::l2(config.l2_reg_embedding);

        let raw = EmbeddingStore::new(
            "raw",
            spec,
            config.embedding_size,
            initializer,
            embedding_reg,
            &mut StdRng::seed_from_u64(config.seed),
        )?;
        let fg = EmbeddingStore::new(
            "fg",
            spec,
            config.embedding_size,
            initializer,
            embedding_reg,
            &mut StdRng::seed_from_u64(config.seed),
        )?;
        let linear = if config.use_linear_logit {
            Some(LinearLogit::new(
                spec,
                initializer,
                Regularizer::l2(config.l2_reg_linear),
                &mut StdRng::seed_from_u64(config.seed),
            )?)
        } else {
            None
        };

        Ok(Self {
            raw,
            fg,
            linear,
            dense_fields: spec.dense.clone(),
        })
    }

    /// Store feeding the interaction block.
    pub fn raw(&self) -> &EmbeddingStore {
        &self.raw
    }

    /// Store feeding feature generation.
    pub fn fg(&self) -> &EmbeddingStore {
        &self.fg
    }

    /// The linear logit, if enabled.
    pub fn linear(&self) -> Option<&LinearLogit> {
        self.linear.as_ref()
    }

    /// Number of dense fields.
    pub fn num_dense(&self) -> usize {
        self.dense_fields.len()
    }

    /// Inference pass.
    pub fn forward(&self, batch: &FeatureBatch) -> Result<EmbeddedInputs> {
        batch.check_not_empty()?;
        let dense = batch.dense_matrix(&self.dense_fields)?;
        let linear_logit = match &self.linear {
            Some(linear) => Some(linear.forward(batch, dense.as_ref())?),
            None => None,
        };
        Ok(EmbeddedInputs {
            raw: self.raw.embed(batch)?,
            fg: self.fg.embed(batch)?,
            dense,
            linear_logit,
        })
    }

    /// Training pass.
    pub fn forward_train(&mut self, batch: &FeatureBatch) -> Result<EmbeddedInputs> {
        batch.check_not_empty()?;
        let dense = batch.dense_matrix(&self.dense_fields)?;
        let linear_logit = match &mut self.linear {
            Some(linear) => Some(linear.forward_train(batch, dense.as_ref())?),
            None => None,
        };
        Ok(EmbeddedInputs {
            raw: self.raw.embed_train(batch)?,
            fg: self.fg.embed_train(batch)?,
            dense,
            linear_logit,
        })
    }

    /// Back-propagates into the three parameter sets.
    pub fn backward(
        &mut self,
        raw_grad: &Tensor,
        fg_grad: &Tensor,
        linear_grad: Option<&Tensor>,
    ) -> Result<()> {
        self.raw.backward(raw_grad)?;
        self.fg.backward(fg_grad)?;
        if let (Some(linear), Some(grad)) = (&mut self.linear, linear_grad) {
            linear.backward(grad)?;
        }
        Ok(())
    }
}

impl ParameterGroup for InputEmbedding {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = self.raw.named_parameters();
        params.extend(self.fg.named_parameters());
        if let Some(linear) = &self.linear {
            params.extend(linear.named_parameters());
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut params = self.raw.named_parameters_mut();
        params.extend(self.fg.named_parameters_mut());
        if let Some(linear) = &mut self.linear {
            params.extend(linear.named_parameters_mut());
        }
        params
    }

    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let mut grads = self.raw.take_gradients();
        grads.extend(self.fg.take_gradients());
        if let Some(linear) = &mut self.linear {
            grads.extend(linear.take_gradients());
        }
        grads
    }

    fn regularization_loss(&self) -> f32 {
        self.raw.regularization_loss()
            + self.fg.regularization_loss()
            + self.linear.as_ref().map_or(0.0, |l| l.regularization_loss())
    }
}
