//! Deterministic synthetic click stream.
//!
//! Each categorical id and each dense field carries a hidden weight drawn
//! once from a standard normal. An example's click probability is the
//! sigmoid of the sum of its weights, so a model can learn the stream.

use anyhow::{ensure, Result};
use fgcnn_model::{FeatureBatch, FeatureSpec, SequenceInput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};

/// Generates labelled batches for a [`FeatureSpec`].
#[derive(Debug, Clone)]
pub struct SyntheticClicks {
    spec: FeatureSpec,
    sparse_weights: Vec<Vec<f32>>,
    dense_weights: Vec<f32>,
    sequence_weights: Vec<Vec<f32>>,
    rng: StdRng,
}

fn draw_weights(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| StandardNormal.sample(rng)).collect()
}

impl SyntheticClicks {
    /// Creates a stream; the same spec and seed always yield the same batches.
    pub fn new(spec: &FeatureSpec, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sparse_weights = spec
            .sparse
            .iter()
            .map(|f| draw_weights(&mut rng, f.cardinality))
            .collect();
        let dense_weights = draw_weights(&mut rng, spec.dense.len());
        let sequence_weights = spec
            .sequence
            .iter()
            .map(|f| draw_weights(&mut rng, f.cardinality))
            .collect();
        Self {
            spec: spec.clone(),
            sparse_weights,
            dense_weights,
            sequence_weights,
            rng,
        }
    }

    /// Discards `batches` batches of `batch_size`, so a resumed run picks
    /// up the stream where the checkpointed run left off.
    pub fn skip(&mut self, batches: u64, batch_size: usize) -> Result<()> {
        for _ in 0..batches {
            self.next_batch(batch_size)?;
        }
        Ok(())
    }

    /// Draws the next batch and its 0/1 labels.
    pub fn next_batch(&mut self, batch_size: usize) -> Result<(FeatureBatch, Vec<f32>)> {
        ensure!(batch_size > 0, "batch size must be positive");

        let mut logits = vec![0.0f32; batch_size];
        let mut batch = FeatureBatch::new(batch_size);

        for (field, weights) in self.spec.sparse.iter().zip(&self.sparse_weights) {
            let ids: Vec<usize> = (0..batch_size)
                .map(|_| self.rng.gen_range(0..field.cardinality))
                .collect();
            for (logit, &id) in logits.iter_mut().zip(&ids) {
                *logit += weights[id];
            }
            batch = batch.with_sparse(field.name.clone(), ids);
        }

        for (field, &weight) in self.spec.dense.iter().zip(&self.dense_weights) {
            let values: Vec<f32> = (0..batch_size)
                .map(|_| StandardNormal.sample(&mut self.rng))
                .collect();
            for (logit, &v) in logits.iter_mut().zip(&values) {
                *logit += weight * v;
            }
            batch = batch.with_dense(field.name.clone(), values);
        }

        for (field, weights) in self.spec.sequence.iter().zip(&self.sequence_weights) {
            let rows: Vec<Vec<usize>> = (0..batch_size)
                .map(|_| {
                    // Id 0 is reserved for padding.
                    let len = if field.cardinality > 1 {
                        self.rng.gen_range(0..=field.max_len)
                    } else {
                        0
                    };
                    (0..len)
                        .map(|_| self.rng.gen_range(1..field.cardinality))
                        .collect()
                })
                .collect();
            for (logit, row) in logits.iter_mut().zip(&rows) {
                if !row.is_empty() {
                    *logit += row.iter().map(|&id| weights[id]).sum::<f32>() / row.len() as f32;
                }
            }
            batch = batch.with_sequence(
                field.name.clone(),
                SequenceInput::from_ragged(&rows, field.max_len),
            );
        }

        let labels = logits
            .iter()
            .map(|&logit| {
                let p = 1.0 / (1.0 + (-logit).exp());
                if self.rng.gen::<f32>() < p {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        Ok((batch, labels))
    }
}
