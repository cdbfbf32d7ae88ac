//! Neural network layers for click-through-rate models.
//!
//! This crate provides the CPU building blocks the FGCNN model is assembled
//! from. It includes:
//!
//! - **Embeddings**: Trainable tables for categorical features
//! - **Sequence pooling**: Masked sum / mean / max over padded id sequences
//! - **Convolution**: Channels-last 2D convolution with a fused activation
//! - **Pooling**: Valid max pooling
//! - **Dense layers** and **MLP** stacks with dropout
//! - **Inner product**: Pairwise field interactions
//! - **Activations**: ReLU, Sigmoid, Tanh
//!
//! # Quick Start
//!
//! ```
//! use fgcnn_layers::prelude::*;
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1024);
//! let mlp = MLPConfig::new(16)
//!     .add_layer(8, ActivationType::Relu)
//!     .add_layer(1, ActivationType::Linear)
//!     .build(&mut rng)
//!     .unwrap();
//!
//! let input = Tensor::ones(&[4, 16]);
//! let output = mlp.forward(&input).unwrap();
//! assert_eq!(output.shape(), &[4, 1]);
//! ```
//!
//! # Layer Trait
//!
//! All layers implement the [`Layer`] trait. Training goes through each
//! layer's `forward_train`, then [`Layer::backward`] and
//! [`Layer::take_gradients`]:
//!
//! ```
//! use fgcnn_layers::prelude::*;
//!
//! fn process_layer<L: Layer>(layer: &L, input: &Tensor) -> Tensor {
//!     layer.forward(input).unwrap()
//! }
//! ```
//!
//! [`Layer`]: layer::Layer
//! [`Layer::backward`]: layer::Layer::backward
//! [`Layer::take_gradients`]: layer::Layer::take_gradients

#![warn(missing_docs)]

pub mod activation;
pub mod conv;
pub mod dense;
pub mod dropout;
pub mod embedding;
pub mod error;
pub mod initializer;
pub mod inner_product;
pub mod layer;
pub mod mlp;
pub mod pooling;
pub mod regularizer;
pub mod sequence_pooling;
pub mod tensor;

pub use error::{LayerError, LayerResult};
pub use layer::Layer;
pub use tensor::Tensor;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::activation::{ActivationLayer, ActivationType, ReLU, Sigmoid, Tanh};
    pub use crate::conv::{Conv2D, Conv2DConfig, Padding};
    pub use crate::dense::Dense;
    pub use crate::dropout::Dropout;
    pub use crate::embedding::EmbeddingTable;
    pub use crate::error::{LayerError, LayerResult};
    pub use crate::initializer::Initializer;
    pub use crate::inner_product::InnerProduct;
    pub use crate::layer::Layer;
    pub use crate::mlp::{MLPConfig, MLP};
    pub use crate::pooling::MaxPooling2D;
    pub use crate::regularizer::Regularizer;
    pub use crate::sequence_pooling::{PoolingMode, SequencePooling};
    pub use crate::tensor::Tensor;
}
