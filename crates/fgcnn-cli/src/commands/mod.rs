//! CLI Command Implementations
//!
//! - [`train`]: fit a model and write checkpoints
//! - [`predict`]: score a JSON batch with a saved model
//! - [`summary`]: describe the model a config builds

mod predict;
mod summary;
mod train;

pub use predict::PredictCommand;
pub use summary::SummaryCommand;
pub use train::{TrainCommand, TrainReport};
