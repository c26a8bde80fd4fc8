//! CLI module - Command line interface definitions and handlers

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// MSIECF Drill - Forensic reader for Internet Explorer index.dat files
///
/// Reads the MSIE Cache File format (history, cache, cookies), lists live
/// entries from the hash table and recovers orphaned records. All
/// operations are READ-ONLY.
#[derive(Parser, Debug)]
#[command(name = "msiecf-drill")]
#[command(author = "Ryan Cashmoney <tunclon@proton.me>")]
#[command(version)]
#[command(about = "Forensic reader for MSIE index.dat cache files", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show header information, cache directories and item counts
    Info(InfoArgs),

    /// Print every live and recovered item
    Export(ExportArgs),

    /// Report which files carry the MSIECF signature
    Detect(DetectArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Parser)]
pub struct InfoArgs {
    /// index.dat file to read
    #[arg(required = true)]
    pub source: PathBuf,

    /// Codepage for non-Unicode strings (e.g. windows-1252, 1251, koi8-r)
    #[arg(long, short)]
    pub codepage: Option<String>,

    /// List unallocated block ranges
    #[arg(long, short)]
    pub all: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "human")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Parser)]
pub struct ExportArgs {
    /// index.dat file to read
    #[arg(required = true)]
    pub source: PathBuf,

    /// Codepage for non-Unicode strings (e.g. windows-1252, 1251, koi8-r)
    #[arg(long, short)]
    pub codepage: Option<String>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "human")]
    pub format: OutputFormat,

    /// Skip the recovery scan
    #[arg(long)]
    pub no_recovery: bool,

    /// Let recovery probe unallocated blocks (deleted records)
    #[arg(long)]
    pub unallocated: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct DetectArgs {
    /// Files to probe
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
pub struct ConfigArgs {
    /// Write the default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print the config file location
    #[arg(long)]
    pub path: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable (default)
    Human,
    /// JSON output
    Json,
}
