//! Feature Generation by Convolutional Neural Network (FGCNN) for
//! click-through-rate prediction.
//!
//! The model embeds every categorical field twice. One copy feeds a stack
//! of convolution + pooling + recombination stages that generate new
//! features. The other copy is concatenated with the generated features,
//! and pairwise inner products over the result feed a deep prediction head.
//!
//! # Example
//!
//! ```
//! use fgcnn_model::{build_fgcnn, FeatureBatch, FeatureSpec, FgcnnConfig, Trainer, TrainerConfig};
//!
//! let spec = FeatureSpec::from_json_str(r#"{"sparse": {"f1": 4, "f2": 3}, "dense": ["f3"]}"#)?;
//! let config = FgcnnConfig::new()
//!     .with_conv_stages(vec![2], vec![2], vec![1])
//!     .with_hidden_size(vec![8]);
//! let model = build_fgcnn(&spec, &config)?;
//! assert_eq!(model.inputs().len(), 3);
//!
//! let batch = FeatureBatch::new(2)
//!     .with_sparse("f1", vec![1, 2])
//!     .with_sparse("f2", vec![0, 2])
//!     .with_dense("f3", vec![0.1, 0.9]);
//! let mut trainer = Trainer::new(model, &TrainerConfig::default())?;
//! let loss = trainer.train_on_batch(&batch, &[1.0, 0.0])?;
//! assert!(loss.is_finite());
//! # Ok::<(), fgcnn_model::FgcnnError>(())
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod feature;
pub mod feature_generation;
pub mod input_embedding;
pub mod interaction;
pub mod loss;
pub mod model;
pub mod params;
pub mod prediction;
pub mod trainer;

pub use batch::{FeatureBatch, SequenceInput};
pub use config::FgcnnConfig;
pub use error::{FgcnnError, Result};
pub use feature::{DenseFeature, FeatureSpec, InputKind, InputSpec, SequenceFeature, SparseFeature};
pub use loss::Loss;
pub use model::{build_fgcnn, FGCNN};
pub use params::ParameterGroup;
pub use trainer::{Trainer, TrainerConfig};
