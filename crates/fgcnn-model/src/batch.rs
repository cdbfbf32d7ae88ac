//! Column-oriented input batches.

use std::collections::HashMap;

use fgcnn_layers::tensor::Tensor;
use serde::Deserialize;

use crate::error::{FgcnnError, Result};
use crate::feature::{DenseFeature, FeatureSpec};

/// Padded ids plus true lengths for one sequence field.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceInput {
    /// `[batch, max_len]` ids, row-major
    ids: Vec<usize>,
    /// True length per example; may exceed `max_len`
    lengths: Vec<usize>,
    max_len: usize,
}

impl SequenceInput {
    /// Wraps already padded ids.
    ///
    /// # Errors
    ///
    /// Returns [`FgcnnError::Input`] if `ids` is not `lengths.len() * max_len` long.
    pub fn new(ids: Vec<usize>, lengths: Vec<usize>, max_len: usize) -> Result<Self> {
        if ids.len() != lengths.len() * max_len {
            return Err(FgcnnError::input(
                "sequence",
                format!(
                    "expected {} padded ids for {} rows of max_len {max_len}, got {}",
                    lengths.len() * max_len,
                    lengths.len(),
                    ids.len()
                ),
            ));
        }
        Ok(Self {
            ids,
            lengths,
            max_len,
        })
    }

    /// Pads (with id 0) or truncates each row to `max_len`.
    ///
    /// The recorded length is the row's original length, so rows longer than
    /// `max_len` are clamped later by the pooling layer.
    pub fn from_ragged(rows: &[Vec<usize>], max_len: usize) -> Self {
        let mut ids = Vec::with_capacity(rows.len() * max_len);
        for row in rows {
            let kept = row.len().min(max_len);
            ids.extend_from_slice(&row[..kept]);
            ids.extend(std::iter::repeat(0).take(max_len - kept));
        }
        Self {
            ids,
            lengths: rows.iter().map(Vec::len).collect(),
            max_len,
        }
    }

    /// Number of rows.
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// Padded length.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Padded ids, `[batch, max_len]` row-major.
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }

    /// True lengths.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }
}

/// A batch of examples, one column per field.
///
/// # Example
///
/// ```
/// use fgcnn_model::FeatureBatch;
///
/// let batch = FeatureBatch::new(2)
///     .with_sparse("f1", vec![0, 3])
///     .with_dense("f3", vec![0.5, -1.0]);
/// assert_eq!(batch.batch_size(), 2);
/// assert_eq!(batch.sparse("f1"), Some(&[0, 3][..]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FeatureBatch {
    batch_size: usize,
    sparse: HashMap<String, Vec<usize>>,
    dense: HashMap<String, Vec<f32>>,
    sequence: HashMap<String, SequenceInput>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchJson {
    #[serde(default)]
    sparse: HashMap<String, Vec<usize>>,
    #[serde(default)]
    dense: HashMap<String, Vec<f32>>,
    #[serde(default)]
    sequence: HashMap<String, Vec<Vec<usize>>>,
}

impl FeatureBatch {
    /// Creates an empty batch of `batch_size` examples.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// Sets a sparse column.
    pub fn with_sparse(mut self, name: impl Into<String>, ids: Vec<usize>) -> Self {
        self.sparse.insert(name.into(), ids);
        self
    }

    /// Sets a dense column.
    pub fn with_dense(mut self, name: impl Into<String>, values: Vec<f32>) -> Self {
        self.dense.insert(name.into(), values);
        self
    }

    /// Sets a sequence column.
    pub fn with_sequence(mut self, name: impl Into<String>, input: SequenceInput) -> Self {
        self.sequence.insert(name.into(), input);
        self
    }

    /// Parses the JSON batch format used by the command line:
    ///
    /// ```json
    /// {"sparse": {"f1": [0, 3]}, "dense": {"f3": [0.5, -1.0]}, "sequence": {"hist": [[1, 2], []]}}
    /// ```
    ///
    /// Sequence rows are padded to the field's `max_len` from `spec`.
    pub fn from_json_str(json: &str, spec: &FeatureSpec) -> Result<Self> {
        let raw: BatchJson = serde_json::from_str(json)
            .map_err(|e| FgcnnError::input("batch", format!("invalid batch JSON: {e}")))?;

        let batch_size = raw
            .sparse
            .values()
            .map(Vec::len)
            .chain(raw.dense.values().map(Vec::len))
            .chain(raw.sequence.values().map(Vec::len))
            .next()
            .ok_or_else(|| FgcnnError::input("batch", "batch has no columns"))?;

        let mut batch = FeatureBatch::new(batch_size);
        batch.sparse = raw.sparse;
        batch.dense = raw.dense;
        for (name, rows) in raw.sequence {
            let field = spec
                .sequence
                .iter()
                .find(|f| f.name == name)
                .ok_or_else(|| FgcnnError::input(name.as_str(), "not a sequence field"))?;
            let input = SequenceInput::from_ragged(&rows, field.max_len);
            batch.sequence.insert(name, input);
        }
        Ok(batch)
    }

    /// Number of examples.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// A sparse column, if present.
    pub fn sparse(&self, name: &str) -> Option<&[usize]> {
        self.sparse.get(name).map(Vec::as_slice)
    }

    /// A dense column, if present.
    pub fn dense(&self, name: &str) -> Option<&[f32]> {
        self.dense.get(name).map(Vec::as_slice)
    }

    /// A sequence column, if present.
    pub fn sequence(&self, name: &str) -> Option<&SequenceInput> {
        self.sequence.get(name)
    }

    pub(crate) fn check_not_empty(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(FgcnnError::input("batch", "batch is empty"));
        }
        Ok(())
    }

    pub(crate) fn require_sparse(&self, name: &str) -> Result<&[usize]> {
        let ids = self
            .sparse(name)
            .ok_or_else(|| FgcnnError::input(name, "missing sparse column"))?;
        self.check_len(name, ids.len())?;
        Ok(ids)
    }

    pub(crate) fn require_dense(&self, name: &str) -> Result<&[f32]> {
        let values = self
            .dense(name)
            .ok_or_else(|| FgcnnError::input(name, "missing dense column"))?;
        self.check_len(name, values.len())?;
        Ok(values)
    }

    pub(crate) fn require_sequence(&self, name: &str, max_len: usize) -> Result<&SequenceInput> {
        let input = self
            .sequence(name)
            .ok_or_else(|| FgcnnError::input(name, "missing sequence column"))?;
        self.check_len(name, input.batch_size())?;
        if input.max_len() != max_len {
            return Err(FgcnnError::input(
                name,
                format!("expected max_len {max_len}, got {}", input.max_len()),
            ));
        }
        Ok(input)
    }

    /// Dense columns stacked to `[batch, fields.len()]`, or `None` without
    /// dense fields.
    pub(crate) fn dense_matrix(&self, fields: &[DenseFeature]) -> Result<Option<Tensor>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let columns = fields
            .iter()
            .map(|f| self.require_dense(&f.name))
            .collect::<Result<Vec<_>>>()?;

        let mut data = Vec::with_capacity(self.batch_size * fields.len());
        for row in 0..self.batch_size {
            data.extend(columns.iter().map(|c| c[row]));
        }
        Ok(Some(Tensor::from_data(&[self.batch_size, fields.len()], data)))
    }

    fn check_len(&self, name: &str, len: usize) -> Result<()> {
        if len != self.batch_size {
            return Err(FgcnnError::input(
                name,
                format!("expected {} rows, got {len}", self.batch_size),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgcnn_layers::sequence_pooling::PoolingMode;

    #[test]
    fn test_from_ragged_pads_and_truncates() {
        let input = SequenceInput::from_ragged(&[vec![1, 2, 3, 4], vec![], vec![5]], 3);
        assert_eq!(input.ids(), &[1, 2, 3, 0, 0, 0, 5, 0, 0]);
        assert_eq!(input.lengths(), &[4, 0, 1]);
        assert_eq!(input.batch_size(), 3);
    }

    #[test]
    fn test_sequence_new_checks_length() {
        assert!(SequenceInput::new(vec![0; 5], vec![1, 1], 3).is_err());
        assert!(SequenceInput::new(vec![0; 6], vec![1, 1], 3).is_ok());
    }

    #[test]
    fn test_require_reports_field() {
        let batch = FeatureBatch::new(2).with_sparse("f1", vec![0]);
        let err = batch.require_sparse("f1").unwrap_err();
        assert!(matches!(err, FgcnnError::Input { ref field, .. } if field == "f1"));
        assert!(batch.require_sparse("f2").is_err());
    }

    #[test]
    fn test_dense_matrix_is_row_major() {
        let fields = vec![
            DenseFeature { name: "a".into() },
            DenseFeature { name: "b".into() },
        ];
        let batch = FeatureBatch::new(2)
            .with_dense("a", vec![1.0, 2.0])
            .with_dense("b", vec![3.0, 4.0]);
        let m = batch.dense_matrix(&fields).unwrap().unwrap();
        assert_eq!(m.shape(), &[2, 2]);
        assert_eq!(m.data(), &[1.0, 3.0, 2.0, 4.0]);
        assert!(batch.dense_matrix(&[]).unwrap().is_none());
    }

    #[test]
    fn test_from_json() {
        let spec = FeatureSpec::new()
            .with_sparse("f1", 4)
            .with_sequence("hist", 5, 2, PoolingMode::Mean);
        let batch = FeatureBatch::from_json_str(
            r#"{"sparse": {"f1": [0, 3]}, "sequence": {"hist": [[1, 2, 3], []]}}"#,
            &spec,
        )
        .unwrap();
        assert_eq!(batch.batch_size(), 2);
        let hist = batch.sequence("hist").unwrap();
        assert_eq!(hist.ids(), &[1, 2, 0, 0]);
        assert_eq!(hist.lengths(), &[3, 0]);

        assert!(FeatureBatch::from_json_str("{}", &spec).is_err());
        assert!(FeatureBatch::from_json_str(r#"{"sequence": {"f1": [[1]]}}"#, &spec).is_err());
    }
}
