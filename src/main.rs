//! # Config Repository CLI
//!
//! Binary entry point for the `config-repo` command-line tool. It parses the
//! command line with `clap` and dispatches to the command implementations;
//! everything else lives in the `config_repo` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
