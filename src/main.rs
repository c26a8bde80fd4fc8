//! MSIECF Drill - Forensic reader for Internet Explorer index.dat files
//!
//! Lists the live entries of an MSIE cache file, recovers records the hash
//! table no longer references, and exports everything as text or JSON.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use msiecf_drill::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(config.log_directive(cli.verbose).parse()?))
        .init();

    match cli.command {
        Commands::Info(args) => {
            commands::run_info(&args, &config)?;
        }
        Commands::Export(args) => {
            commands::run_export(&args, &config)?;
        }
        Commands::Detect(args) => {
            if commands::run_detect(&args) == 0 {
                std::process::exit(1);
            }
        }
        Commands::Config(args) => {
            commands::run_config(&args)?;
        }
    }

    Ok(())
}
