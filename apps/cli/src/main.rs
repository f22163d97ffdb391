//! Tailor CLI — document-tailoring jobs with a quality gate.
//!
//! Submits resume-tailoring jobs against remote capability providers, tracks
//! their pipeline state, and hands out signed artifact downloads.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
