//! Prooforacle - batch file-availability oracle
//!
//! Ingests files into a local block store, attests their availability under
//! a timestamped Merkle root, and verifies the resulting inclusion proofs.

use clap::Parser;
use prooforacle_core::{run, Cli};
use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level);

    // Run the command
    run(cli).await?;

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
