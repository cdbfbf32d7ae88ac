//! FGCNN CLI - train, score and inspect click-through-rate models.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fgcnn_cli::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("fgcnn=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(cmd) => cmd.run().map(|_| ())?,
        Commands::Predict(cmd) => cmd.run()?,
        Commands::Summary(cmd) => cmd.run()?,
    }

    info!("FGCNN CLI completed successfully");
    Ok(())
}
