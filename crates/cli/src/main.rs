//! Command-line entry point for GemmRoute.

use anyhow::Result;
use clap::Parser;
use gemmroute_offload::cli::{run_cli, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run_cli(cli)
}
