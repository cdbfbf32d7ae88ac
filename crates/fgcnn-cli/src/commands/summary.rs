//! Summary Command Implementation

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use fgcnn_model::{build_fgcnn, ParameterGroup};

use crate::run_config::RunConfig;

/// Print the model inputs and parameters for a config
#[derive(Args, Debug, Clone)]
pub struct SummaryCommand {
    /// Path to the run configuration file (JSON format)
    #[arg(long = "config", short = 'c', env = "FGCNN_CONFIG_PATH")]
    pub config_path: Option<PathBuf>,
}

impl SummaryCommand {
    /// Execute the summary command
    pub fn run(&self) -> Result<()> {
        for line in self.lines()? {
            println!("{line}");
        }
        Ok(())
    }

    /// The summary as printed, one line per entry.
    pub fn lines(&self) -> Result<Vec<String>> {
        let run = RunConfig::load(self.config_path.as_deref())?;
        let model = build_fgcnn(&run.features, &run.model)?;

        let mut lines = vec!["inputs:".to_string()];
        for input in model.inputs() {
            lines.push(format!("  {:<24} {:?} width={}", input.name, input.kind, input.width));
        }
        lines.push(format!("generated features: {}", model.generated_len()));
        lines.push(format!("head input width: {}", model.head_input_dim()));
        lines.push("parameters:".to_string());
        for (name, tensor) in model.named_parameters() {
            lines.push(format!("  {:<48} {:?}", name, tensor.shape()));
        }
        lines.push(format!("total parameters: {}", model.num_parameters()));
        Ok(lines)
    }
}
