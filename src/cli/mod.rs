//! Command-line interface definitions and handlers.
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod progress;

/// sfmload - import legacy Shoebox (SFM) databases into a structured store
#[derive(Parser, Debug)]
#[command(name = "sfmload")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the markers found in an SFM file
    Scan(ScanArgs),
    /// Check a settings file against an SFM file
    Check(CheckArgs),
    /// Import an SFM file into a database
    Import(ImportArgs),
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// SFM data file
    pub file: PathBuf,

    /// Count records delimited by this marker
    #[arg(long, value_name = "MARKER")]
    pub record_marker: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// SFM data file
    pub file: PathBuf,

    /// Import settings file (Shoebox settings block format)
    #[arg(short, long)]
    pub settings: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// SFM data file
    pub file: PathBuf,

    /// Import settings file (Shoebox settings block format)
    #[arg(short, long)]
    pub settings: PathBuf,

    /// SQLite database to import into (created when missing)
    #[arg(short, long)]
    pub db: PathBuf,

    /// Project the records are imported under
    #[arg(short, long, default_value = "Imported Notebook")]
    pub project: String,
}
