//! Command handlers.

mod check;
mod import;
mod scan;

use crate::error::Result;

use super::{Cli, Commands};

/// Dispatch the parsed command line.
pub fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Scan(args) => scan::run(args),
        Commands::Check(args) => check::run(args),
        Commands::Import(args) => import::run(args, cli.quiet),
    }
}
