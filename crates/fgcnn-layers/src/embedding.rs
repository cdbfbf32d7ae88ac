//! Embedding lookup layer.
//!
//! This module provides the [`EmbeddingTable`] layer: a dense trainable
//! `[cardinality, dim]` table indexed by categorical ids. Gradients are
//! scatter-added into a table-shaped accumulator so that a row looked up
//! several times in one batch receives the sum of its gradients.

use crate::error::LayerError;
use crate::initializer::Initializer;
use crate::layer::Layer;
use crate::regularizer::Regularizer;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// A trainable embedding table.
///
/// # Example
///
/// ```
/// use fgcnn_layers::embedding::EmbeddingTable;
/// use fgcnn_layers::initializer::Initializer;
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(1024);
/// let table = EmbeddingTable::new(10, 4, Initializer::Constant(0.5), &mut rng).unwrap();
/// let rows = table.lookup(&[1, 3, 1]).unwrap();
/// assert_eq!(rows.shape(), &[3, 4]);
/// ```
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    /// Table of shape [cardinality, dim]
    table: Tensor,
    /// Embedding regularizer
    regularizer: Regularizer,
    /// Cached ids for backward pass
    cached_ids: Option<Vec<usize>>,
    /// Accumulated gradient, same shape as the table
    grad_accumulator: Option<Tensor>,
}

impl EmbeddingTable {
    /// Creates a table with `cardinality` rows of width `dim`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ConfigError`] if either dimension is zero.
    pub fn new(
        cardinality: usize,
        dim: usize,
        initializer: Initializer,
        rng: &mut StdRng,
    ) -> Result<Self, LayerError> {
        if cardinality == 0 || dim == 0 {
            return Err(LayerError::ConfigError {
                message: format!(
                    "Embedding table needs positive cardinality and dim, got [{cardinality}, {dim}]"
                ),
            });
        }
        Ok(Self {
            table: initializer.initialize(&[cardinality, dim], rng)?,
            regularizer: Regularizer::None,
            cached_ids: None,
            grad_accumulator: None,
        })
    }

    /// Sets the embedding regularizer.
    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = regularizer;
        self
    }

    /// Number of rows.
    pub fn cardinality(&self) -> usize {
        self.table.shape()[0]
    }

    /// Embedding width.
    pub fn dim(&self) -> usize {
        self.table.shape()[1]
    }

    /// The underlying table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Returns the embedding row for `id`.
    pub fn row(&self, id: usize) -> Result<&[f32], LayerError> {
        let cardinality = self.cardinality();
        if id >= cardinality {
            return Err(LayerError::IdOutOfRange { id, cardinality });
        }
        let dim = self.dim();
        Ok(&self.table.data()[id * dim..(id + 1) * dim])
    }

    /// Looks up embeddings for the given ids.
    ///
    /// # Returns
    ///
    /// A tensor of shape `[ids.len(), dim]`
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::IdOutOfRange`] for an id `>= cardinality`.
    pub fn lookup(&self, ids: &[usize]) -> Result<Tensor, LayerError> {
        let dim = self.dim();
        let mut data = Vec::with_capacity(ids.len() * dim);
        for &id in ids {
            data.extend_from_slice(self.row(id)?);
        }
        Ok(Tensor::from_data(&[ids.len(), dim], data))
    }

    /// Looks up embeddings and caches ids for the backward pass.
    pub fn lookup_train(&mut self, ids: &[usize]) -> Result<Tensor, LayerError> {
        let output = self.lookup(ids)?;
        self.cached_ids = Some(ids.to_vec());
        Ok(output)
    }

    /// Scatter-adds `grad` (shape `[num_ids, dim]`) into the accumulator
    /// rows of the cached ids.
    pub fn accumulate_grad(&mut self, grad: &Tensor) -> Result<(), LayerError> {
        let ids = self.cached_ids.as_ref().ok_or(LayerError::NotInitialized)?;
        let dim = self.table.shape()[1];
        if grad.shape() != [ids.len(), dim].as_slice() {
            return Err(LayerError::ShapeMismatch {
                expected: vec![ids.len(), dim],
                actual: grad.shape().to_vec(),
            });
        }

        let acc = self
            .grad_accumulator
            .get_or_insert_with(|| Tensor::zeros(self.table.shape()));
        let acc_data = acc.data_mut();
        for (i, &id) in ids.iter().enumerate() {
            let src = &grad.data()[i * dim..(i + 1) * dim];
            let dst = &mut acc_data[id * dim..(id + 1) * dim];
            for (d, &g) in dst.iter_mut().zip(src) {
                *d += g;
            }
        }
        Ok(())
    }

    /// Clears cached ids and gradients.
    pub fn clear_cache(&mut self) {
        self.cached_ids = None;
        self.grad_accumulator = None;
    }
}

fn ids_from_tensor(input: &Tensor) -> Result<Vec<usize>, LayerError> {
    input
        .data()
        .iter()
        .map(|&x| {
            if x < 0.0 || x.fract() != 0.0 {
                Err(LayerError::ForwardError {
                    message: format!("embedding ids must be non-negative integers, got {x}"),
                })
            } else {
                Ok(x as usize)
            }
        })
        .collect()
}

impl Layer for EmbeddingTable {
    /// Input is a 1D tensor of ids encoded as `f32`.
    fn forward(&self, input: &Tensor) -> Result<Tensor, LayerError> {
        if input.ndim() != 1 {
            return Err(LayerError::ForwardError {
                message: format!("EmbeddingTable expects 1D input, got {}D", input.ndim()),
            });
        }
        self.lookup(&ids_from_tensor(input)?)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<Tensor, LayerError> {
        self.accumulate_grad(grad)?;
        // ids have no gradient
        let num_ids = self.cached_ids.as_ref().map(|ids| ids.len()).unwrap_or(0);
        Ok(Tensor::zeros(&[num_ids]))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.table]
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.table]
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        vec!["embeddings"]
    }

    /// The regularization gradient is added once per collected gradient,
    /// however many lookups fed the accumulator.
    fn take_gradients(&mut self) -> Vec<Option<Tensor>> {
        let grad = self.grad_accumulator.take().map(|mut g| {
            self.regularizer.accumulate_grad(&self.table, &mut g);
            g
        });
        vec![grad]
    }

    fn regularization_loss(&self) -> f32 {
        self.regularizer.loss(&self.table)
    }

    fn name(&self) -> &str {
        "EmbeddingTable"
    }
}
