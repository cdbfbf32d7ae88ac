//! FGCNN CLI Library
//!
//! Command-line front end for the FGCNN click-through-rate model:
//!
//! - **Train**: fit a model on a synthetic click stream and write checkpoints
//! - **Predict**: score a JSON batch with the latest checkpoint
//! - **Summary**: print the inputs and parameter tensors a config produces
//!
//! # Example
//!
//! ```bash
//! fgcnn summary --config run.json
//! fgcnn train --model-dir /tmp/fgcnn --config run.json --train-steps 500
//! fgcnn predict --model-dir /tmp/fgcnn --input batch.json
//! ```

pub mod commands;
pub mod run_config;
pub mod synthetic;

use clap::{Parser, Subcommand, ValueEnum};
use fgcnn_checkpoint::{BinaryCheckpointer, Checkpointer, JsonCheckpointer};

pub use commands::{PredictCommand, SummaryCommand, TrainCommand, TrainReport};
pub use run_config::RunConfig;
pub use synthetic::SyntheticClicks;

/// FGCNN - feature generation by convolutional neural network
#[derive(Parser, Debug)]
#[command(name = "fgcnn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model and write checkpoints
    Train(TrainCommand),

    /// Score a batch with the latest checkpoint
    Predict(PredictCommand),

    /// Print the model inputs and parameters for a config
    Summary(SummaryCommand),
}

/// On-disk checkpoint encoding.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckpointFormat {
    /// Human-readable JSON
    #[default]
    Json,
    /// Compact bincode
    Binary,
}

impl CheckpointFormat {
    /// Checkpointer for this format.
    pub fn checkpointer(self) -> Box<dyn Checkpointer> {
        match self {
            CheckpointFormat::Json => Box::new(JsonCheckpointer::new()),
            CheckpointFormat::Binary => Box::new(BinaryCheckpointer::new()),
        }
    }
}
