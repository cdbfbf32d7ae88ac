//! The JSON file shared by `train` and `summary`.
//!
//! ```json
//! {
//!   "features": {"sparse": {"user": 1000, "item": 500}, "dense": ["price"]},
//!   "model": {"embedding_size": 8, "hidden_size": [64]},
//!   "trainer": {"optimizer": {"Adam": {"learning_rate": 0.001, "beta1": 0.9, "beta2": 0.999, "epsilon": 1e-7}}}
//! }
//! ```
//!
//! Every section is optional; missing sections fall back to [`RunConfig::default`].

use std::path::Path;

use anyhow::{Context, Result};
use fgcnn_layers::sequence_pooling::PoolingMode;
use fgcnn_model::{FeatureSpec, FgcnnConfig, TrainerConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Features, model hyperparameters and trainer settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Input fields
    pub features: FeatureSpec,
    /// Model hyperparameters
    pub model: FgcnnConfig,
    /// Optimizer settings
    pub trainer: TrainerConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            features: FeatureSpec::new()
                .with_sparse("user", 1000)
                .with_sparse("item", 500)
                .with_sparse("category", 20)
                .with_dense("price")
                .with_sequence("clicked_items", 500, 10, PoolingMode::Mean),
            model: FgcnnConfig::default().with_hidden_size(vec![64]),
            trainer: TrainerConfig::default(),
        }
    }
}

impl RunConfig {
    /// Reads a run config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        info!("Loading config from: {:?}", path);
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text).context("Failed to parse config JSON")
    }

    /// Reads `path` when given, otherwise returns the default config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                warn!("No config file provided, using default configuration");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fgcnn_optimizer::OptimizerConfig;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": {{"embedding_size": 4}}, "trainer": {{"optimizer": {{"Sgd": {{"learning_rate": 0.1}}}}}}}}"#
        )
        .unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.model.embedding_size, 4);
        assert_eq!(config.model.conv_filters, vec![4, 4]);
        assert_eq!(config.trainer.optimizer, OptimizerConfig::Sgd { learning_rate: 0.1 });
        assert_eq!(config.features, RunConfig::default().features);
    }

    #[test]
    fn test_unknown_section_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"modle": {{}}}}"#).unwrap();
        assert!(RunConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = RunConfig::load(Some(Path::new("/nonexistent/run.json"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/run.json"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::load(None).unwrap();
        assert!(config.features.validate().is_ok());
        assert!(config.model.validate().is_ok());
    }
}
