//! Hyperparameters for the FGCNN model.

use fgcnn_layers::activation::ActivationType;
use serde::{Deserialize, Serialize};

use crate::error::{FgcnnError, Result};

/// FGCNN hyperparameters.
///
/// Missing JSON keys take the defaults below, so `{}` is a valid config.
///
/// # Example
///
/// ```
/// use fgcnn_model::FgcnnConfig;
///
/// let config = FgcnnConfig::new()
///     .with_embedding_size(4)
///     .with_conv_stages(vec![3], vec![2], vec![1])
///     .with_hidden_size(vec![16]);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.num_stages(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FgcnnConfig {
    /// Width of every embedding vector.
    pub embedding_size: usize,
    /// Convolution kernel height per feature generation stage.
    pub conv_kernel_width: Vec<usize>,
    /// Convolution filter count per stage.
    pub conv_filters: Vec<usize>,
    /// Generated feature maps per stage.
    pub new_maps: Vec<usize>,
    /// Max pooling window (and stride) along the field axis.
    pub pooling_width: usize,
    /// Hidden layer widths of the prediction head.
    pub hidden_size: Vec<usize>,
    /// Activation of the hidden layers.
    pub hidden_activation: ActivationType,
    /// L2 strength on embedding tables.
    pub l2_reg_embedding: f32,
    /// L2 strength on the linear logit weights.
    pub l2_reg_linear: f32,
    /// L2 strength on the hidden layer kernels.
    pub l2_reg_deep: f32,
    /// Probability of keeping a hidden unit during training.
    pub keep_prob: f32,
    /// Standard deviation of the embedding initializer.
    pub init_std: f32,
    /// Seed for every initializer and dropout mask.
    pub seed: u64,
    /// Output activation, `sigmoid` or `linear`.
    pub final_activation: ActivationType,
    /// Add the linear logit to the head's logit.
    pub use_linear_logit: bool,
    /// Include `(i, i)` pairs in the inner-product interaction.
    pub include_self_pairs: bool,
}

impl Default for FgcnnConfig {
    fn default() -> Self {
        Self {
            embedding_size: 8,
            conv_kernel_width: vec![6, 5],
            conv_filters: vec![4, 4],
            new_maps: vec![3, 3],
            pooling_width: 2,
            hidden_size: vec![128],
            hidden_activation: ActivationType::Relu,
            l2_reg_embedding: 1e-5,
            l2_reg_linear: 0.0,
            l2_reg_deep: 0.0,
            keep_prob: 1.0,
            init_std: 1e-4,
            seed: 1024,
            final_activation: ActivationType::Sigmoid,
            use_linear_logit: false,
            include_self_pairs: false,
        }
    }
}

impl FgcnnConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FgcnnError::validation(format!("invalid model config: {e}")))
    }

    /// Sets the embedding size.
    pub fn with_embedding_size(mut self, embedding_size: usize) -> Self {
        self.embedding_size = embedding_size;
        self
    }

    /// Sets the three per-stage lists at once.
    pub fn with_conv_stages(
        mut self,
        conv_kernel_width: Vec<usize>,
        conv_filters: Vec<usize>,
        new_maps: Vec<usize>,
    ) -> Self {
        self.conv_kernel_width = conv_kernel_width;
        self.conv_filters = conv_filters;
        self.new_maps = new_maps;
        self
    }

    /// Sets the pooling width.
    pub fn with_pooling_width(mut self, pooling_width: usize) -> Self {
        self.pooling_width = pooling_width;
        self
    }

    /// Sets the hidden layer widths.
    pub fn with_hidden_size(mut self, hidden_size: Vec<usize>) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Sets the hidden activation.
    pub fn with_hidden_activation(mut self, activation: ActivationType) -> Self {
        self.hidden_activation = activation;
        self
    }

    /// Sets the embedding L2 strength.
    pub fn with_l2_reg_embedding(mut self, l2: f32) -> Self {
        self.l2_reg_embedding = l2;
        self
    }

    /// Sets the linear logit L2 strength.
    pub fn with_l2_reg_linear(mut self, l2: f32) -> Self {
        self.l2_reg_linear = l2;
        self
    }

    /// Sets the hidden layer L2 strength.
    pub fn with_l2_reg_deep(mut self, l2: f32) -> Self {
        self.l2_reg_deep = l2;
        self
    }

    /// Sets the dropout keep probability.
    pub fn with_keep_prob(mut self, keep_prob: f32) -> Self {
        self.keep_prob = keep_prob;
        self
    }

    /// Sets the embedding initializer standard deviation.
    pub fn with_init_std(mut self, init_std: f32) -> Self {
        self.init_std = init_std;
        self
    }

    /// Sets the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the output activation.
    pub fn with_final_activation(mut self, activation: ActivationType) -> Self {
        self.final_activation = activation;
        self
    }

    /// Enables or disables the linear logit.
    pub fn with_linear_logit(mut self, enabled: bool) -> Self {
        self.use_linear_logit = enabled;
        self
    }

    /// Enables or disables self pairs in the interaction.
    pub fn with_self_pairs(mut self, enabled: bool) -> Self {
        self.include_self_pairs = enabled;
        self
    }

    /// Number of feature generation stages.
    pub fn num_stages(&self) -> usize {
        self.conv_filters.len()
    }

    /// Dropout rate of the hidden layers.
    pub fn dropout_rate(&self) -> f32 {
        1.0 - self.keep_prob
    }

    /// Checks the configuration.
    ///
    /// The per-stage list lengths are checked first so that a mismatch is
    /// reported before any other problem.
    pub fn validate(&self) -> Result<()> {
        let (kw, cf, nm) = (
            self.conv_kernel_width.len(),
            self.conv_filters.len(),
            self.new_maps.len(),
        );
        if kw != cf || cf != nm {
            return Err(FgcnnError::validation(format!(
                "conv_kernel_width, conv_filters and new_maps must have the same length, \
                 got conv_kernel_width={kw}, conv_filters={cf}, new_maps={nm}"
            )));
        }

        if self.embedding_size == 0 {
            return Err(FgcnnError::validation("embedding_size must be positive"));
        }
        if self.pooling_width == 0 {
            return Err(FgcnnError::validation("pooling_width must be positive"));
        }
        for (list, values) in [
            ("conv_kernel_width", &self.conv_kernel_width),
            ("conv_filters", &self.conv_filters),
            ("new_maps", &self.new_maps),
            ("hidden_size", &self.hidden_size),
        ] {
            if let Some(i) = values.iter().position(|&v| v == 0) {
                return Err(FgcnnError::validation(format!(
                    "{list}[{i}] must be positive"
                )));
            }
        }

        if !(self.keep_prob > 0.0 && self.keep_prob <= 1.0) {
            return Err(FgcnnError::validation(format!(
                "keep_prob must be in (0, 1], got {}",
                self.keep_prob
            )));
        }
        if !(self.init_std.is_finite() && self.init_std >= 0.0) {
            return Err(FgcnnError::validation(format!(
                "init_std must be a non-negative number, got {}",
                self.init_std
            )));
        }
        for (name, value) in [
            ("l2_reg_embedding", self.l2_reg_embedding),
            ("l2_reg_linear", self.l2_reg_linear),
            ("l2_reg_deep", self.l2_reg_deep),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(FgcnnError::validation(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        match self.final_activation {
            ActivationType::Sigmoid | ActivationType::Linear => Ok(()),
            other => Err(FgcnnError::validation(format!(
                "final_activation must be sigmoid or linear, got {other}"
            ))),
        }
    }
}
