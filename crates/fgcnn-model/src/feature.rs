//! Declarative description of the model's input fields.
//!
//! The JSON form groups fields by category and keeps declaration order:
//!
//! ```json
//! {
//!   "sparse": {"user_id": 1000, "item_id": 500},
//!   "dense": ["price"],
//!   "sequence": {"history": {"cardinality": 500, "max_len": 20, "combiner": "mean"}}
//! }
//! ```
//!
//! Embedded fields are ordered sparse first, then sequence; that order fixes
//! the layout of the embedding sequence and of the inner-product pairs.

use std::collections::HashSet;
use std::fmt;

use fgcnn_layers::sequence_pooling::PoolingMode;
use serde::de::{self, MapAccess, SeqAccess};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{FgcnnError, Result};

/// Categorical field with a single id per example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseFeature {
    /// Field name
    pub name: String,
    /// Vocabulary size
    pub cardinality: usize,
}

/// Continuous scalar field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseFeature {
    /// Field name
    pub name: String,
}

/// Variable-length list of categorical ids, pooled to one vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFeature {
    /// Field name
    pub name: String,
    /// Vocabulary size
    pub cardinality: usize,
    /// Padded length
    pub max_len: usize,
    /// How positions are reduced
    pub combiner: PoolingMode,
}

/// Category of a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// One categorical id per example
    Sparse,
    /// One real value per example
    Dense,
    /// `width` padded ids plus a length per example
    Sequence,
}

/// What one input of a [`FeatureBatch`](crate::batch::FeatureBatch) must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Field name
    pub name: String,
    /// Field category
    pub kind: InputKind,
    /// Values per example
    pub width: usize,
}

/// The full set of input fields.
///
/// Deserializes from the JSON form; a key repeated within any object is
/// rejected rather than overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(into = "Value")]
pub struct FeatureSpec {
    /// Sparse fields in declaration order
    pub sparse: Vec<SparseFeature>,
    /// Dense fields in declaration order
    pub dense: Vec<DenseFeature>,
    /// Sequence fields in declaration order
    pub sequence: Vec<SequenceFeature>,
}

impl FeatureSpec {
    /// Creates an empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sparse field.
    pub fn with_sparse(mut self, name: impl Into<String>, cardinality: usize) -> Self {
        self.sparse.push(SparseFeature {
            name: name.into(),
            cardinality,
        });
        self
    }

    /// Adds a dense field.
    pub fn with_dense(mut self, name: impl Into<String>) -> Self {
        self.dense.push(DenseFeature { name: name.into() });
        self
    }

    /// Adds a sequence field.
    pub fn with_sequence(
        mut self,
        name: impl Into<String>,
        cardinality: usize,
        max_len: usize,
        combiner: PoolingMode,
    ) -> Self {
        self.sequence.push(SequenceFeature {
            name: name.into(),
            cardinality,
            max_len,
            combiner,
        });
        self
    }

    /// Total number of fields.
    pub fn num_fields(&self) -> usize {
        self.sparse.len() + self.dense.len() + self.sequence.len()
    }

    /// Number of fields that own an embedding table.
    pub fn num_embedded(&self) -> usize {
        self.sparse.len() + self.sequence.len()
    }

    /// One input description per field: sparse, then dense, then sequence.
    pub fn input_specs(&self) -> Vec<InputSpec> {
        let sparse = self.sparse.iter().map(|f| InputSpec {
            name: f.name.clone(),
            kind: InputKind::Sparse,
            width: 1,
        });
        let dense = self.dense.iter().map(|f| InputSpec {
            name: f.name.clone(),
            kind: InputKind::Dense,
            width: 1,
        });
        let sequence = self.sequence.iter().map(|f| InputSpec {
            name: f.name.clone(),
            kind: InputKind::Sequence,
            width: f.max_len,
        });
        sparse.chain(dense).chain(sequence).collect()
    }

    /// Checks name uniqueness and sizes.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let names = self
            .sparse
            .iter()
            .map(|f| &f.name)
            .chain(self.dense.iter().map(|f| &f.name))
            .chain(self.sequence.iter().map(|f| &f.name));
        for name in names {
            if name.is_empty() {
                return Err(FgcnnError::validation("field names must not be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(FgcnnError::validation(format!(
                    "duplicate field name '{name}'"
                )));
            }
        }

        for f in &self.sparse {
            if f.cardinality == 0 {
                return Err(FgcnnError::validation(format!(
                    "sparse field '{}' has zero cardinality",
                    f.name
                )));
            }
        }
        for f in &self.sequence {
            if f.cardinality == 0 {
                return Err(FgcnnError::validation(format!(
                    "sequence field '{}' has zero cardinality",
                    f.name
                )));
            }
            if f.max_len == 0 {
                return Err(FgcnnError::validation(format!(
                    "sequence field '{}' has zero max_len",
                    f.name
                )));
            }
        }

        if self.num_embedded() == 0 {
            return Err(FgcnnError::validation(
                "feature spec needs at least one sparse or sequence field",
            ));
        }
        Ok(())
    }

    /// Parses and validates the JSON form.
    ///
    /// Repeated keys, whether a category or a field name, are a validation
    /// error.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let UniqueKeys(value) = serde_json::from_str(json)
            .map_err(|e| FgcnnError::validation(format!("invalid feature spec JSON: {e}")))?;
        Self::from_json_value(&value)
    }

    /// Parses and validates an already decoded JSON value.
    pub fn from_json_value(value: &Value) -> Result<Self> {
        let categories = value
            .as_object()
            .ok_or_else(|| FgcnnError::validation("feature spec must be a JSON object"))?;

        let mut spec = FeatureSpec::new();
        for (category, fields) in categories {
            match category.as_str() {
                "sparse" => {
                    for (name, cardinality) in object(fields, category)? {
                        spec.sparse.push(SparseFeature {
                            name: name.clone(),
                            cardinality: count(cardinality, name, "cardinality")?,
                        });
                    }
                }
                "dense" => {
                    let names = fields.as_array().ok_or_else(|| {
                        FgcnnError::validation("'dense' must be a list of field names")
                    })?;
                    for name in names {
                        let name = name.as_str().ok_or_else(|| {
                            FgcnnError::validation(format!(
                                "dense field names must be strings, got {name}"
                            ))
                        })?;
                        spec.dense.push(DenseFeature {
                            name: name.to_string(),
                        });
                    }
                }
                "sequence" => {
                    for (name, descriptor) in object(fields, category)? {
                        spec.sequence.push(parse_sequence(name, descriptor)?);
                    }
                }
                other => {
                    return Err(FgcnnError::validation(format!(
                        "unsupported field category '{other}', expected sparse, dense or sequence"
                    )))
                }
            }
        }

        spec.validate()?;
        Ok(spec)
    }

    /// The JSON form accepted by [`FeatureSpec::from_json_value`].
    pub fn to_json_value(&self) -> Value {
        let mut root = Map::new();
        if !self.sparse.is_empty() {
            let sparse = self
                .sparse
                .iter()
                .map(|f| (f.name.clone(), Value::from(f.cardinality)))
                .collect();
            root.insert("sparse".to_string(), Value::Object(sparse));
        }
        if !self.dense.is_empty() {
            let dense = self
                .dense
                .iter()
                .map(|f| Value::from(f.name.clone()))
                .collect();
            root.insert("dense".to_string(), Value::Array(dense));
        }
        if !self.sequence.is_empty() {
            let sequence = self
                .sequence
                .iter()
                .map(|f| {
                    let mut d = Map::new();
                    d.insert("cardinality".to_string(), Value::from(f.cardinality));
                    d.insert("max_len".to_string(), Value::from(f.max_len));
                    d.insert("combiner".to_string(), Value::from(f.combiner.as_str()));
                    (f.name.clone(), Value::Object(d))
                })
                .collect();
            root.insert("sequence".to_string(), Value::Object(sequence));
        }
        Value::Object(root)
    }
}

impl<'de> Deserialize<'de> for FeatureSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let UniqueKeys(value) = UniqueKeys::deserialize(deserializer)?;
        Self::from_json_value(&value).map_err(de::Error::custom)
    }
}

impl From<FeatureSpec> for Value {
    fn from(spec: FeatureSpec) -> Self {
        spec.to_json_value()
    }
}

/// A JSON value decoded without letting a later key overwrite an earlier
/// one. `serde_json::Value` keeps only the last occurrence.
struct UniqueKeys(Value);

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UniqueKeysVisitor;

        impl<'de> de::Visitor<'de> for UniqueKeysVisitor {
            type Value = UniqueKeys;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a JSON value without repeated object keys")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::Bool(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::from(v)))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::String(v)))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::Null))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<UniqueKeys, E> {
                Ok(UniqueKeys(Value::Null))
            }

            fn visit_some<D>(self, deserializer: D) -> std::result::Result<UniqueKeys, D::Error>
            where
                D: Deserializer<'de>,
            {
                UniqueKeys::deserialize(deserializer)
            }

            fn visit_seq<A>(self, mut seq: A) -> std::result::Result<UniqueKeys, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut items = Vec::new();
                while let Some(UniqueKeys(item)) = seq.next_element()? {
                    items.push(item);
                }
                Ok(UniqueKeys(Value::Array(items)))
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<UniqueKeys, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    if entries.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key '{key}'")));
                    }
                    let UniqueKeys(value) = map.next_value()?;
                    entries.insert(key, value);
                }
                Ok(UniqueKeys(Value::Object(entries)))
            }
        }

        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

fn object<'a>(value: &'a Value, category: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        FgcnnError::validation(format!("'{category}' must map field names to descriptors"))
    })
}

fn count(value: &Value, field: &str, key: &str) -> Result<usize> {
    value
        .as_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| {
            FgcnnError::validation(format!(
                "field '{field}': {key} must be a non-negative integer, got {value}"
            ))
        })
}

fn parse_sequence(name: &str, descriptor: &Value) -> Result<SequenceFeature> {
    let d = descriptor.as_object().ok_or_else(|| {
        FgcnnError::validation(format!("sequence field '{name}' must be an object"))
    })?;
    if let Some(key) = d
        .keys()
        .find(|k| !matches!(k.as_str(), "cardinality" | "max_len" | "combiner"))
    {
        return Err(FgcnnError::validation(format!(
            "sequence field '{name}' has unknown key '{key}'"
        )));
    }

    let required = |key: &str| {
        d.get(key).ok_or_else(|| {
            FgcnnError::validation(format!("sequence field '{name}' is missing '{key}'"))
        })
    };
    let cardinality = count(required("cardinality")?, name, "cardinality")?;
    let max_len = count(required("max_len")?, name, "max_len")?;
    let combiner = match d.get("combiner") {
        None => PoolingMode::default(),
        Some(v) => v
            .as_str()
            .ok_or_else(|| {
                FgcnnError::validation(format!("sequence field '{name}': combiner must be a string"))
            })?
            .parse()
            .map_err(|e| FgcnnError::validation(format!("sequence field '{name}': {e}")))?,
    };

    Ok(SequenceFeature {
        name: name.to_string(),
        cardinality,
        max_len,
        combiner,
    })
}
