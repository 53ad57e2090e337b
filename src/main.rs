#![recursion_limit = "256"]

mod cli;
mod application;
mod domain;
mod data;
mod error;
mod ml;
mod infra;

use anyhow::Result;
use cli::Cli;
use clap::Parser;

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.run()
}
