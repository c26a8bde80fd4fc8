//! Command handlers for the `msiecf-drill` binary

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use serde::Serialize;

use super::{ConfigArgs, DetectArgs, ExportArgs, InfoArgs, OutputFormat};
use crate::codepage::Codepage;
use crate::config::{generate_sample_config, Config};
use crate::file::{File, OpenOptions};
use crate::format::check_file_signature;
use crate::readonly;
use crate::report::{format_file_report, format_item_report, Collection, FileReport, ItemReport};
use crate::source::MmapSource;

/// Load the config named on the command line, or the default one
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    if config.general.enforce_readonly {
        readonly::enable_readonly_enforcement();
    } else {
        readonly::disable_readonly_enforcement();
    }

    Ok(config)
}

fn open(
    source: &Path,
    config: &Config,
    codepage: Option<&str>,
    adjust: impl FnOnce(&mut OpenOptions),
) -> Result<File<MmapSource>> {
    readonly::run_safety_checks(source).map_err(|e| anyhow!(e))?;

    let mut options = config.open_options()?;
    if let Some(name) = codepage {
        options.codepage =
            Codepage::from_name(name).with_context(|| format!("Unsupported codepage: {}", name))?;
    }
    adjust(&mut options);

    File::open_path_with(source, options)
        .with_context(|| format!("Failed to open {}", source.display()))
}

pub fn run_info(args: &InfoArgs, config: &Config) -> Result<()> {
    let file = open(&args.source, config, args.codepage.as_deref(), |_| {})?;
    let report = FileReport::build(&file, &args.source.display().to_string())?;

    match args.format {
        OutputFormat::Human => print!("{}", format_file_report(&report, args.all)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(())
}

#[derive(Serialize)]
struct ExportDocument {
    file: FileReport,
    items: Vec<ItemReport>,
}

pub fn run_export(args: &ExportArgs, config: &Config) -> Result<()> {
    let file = open(&args.source, config, args.codepage.as_deref(), |options| {
        if args.no_recovery {
            options.recovery = false;
        }
        if args.unallocated {
            options.include_unallocated = true;
        }
    })?;

    let mut reports = Vec::new();
    for (collection, count) in [
        (Collection::Live, file.item_count()?),
        (Collection::Recovered, file.recovered_item_count()?),
    ] {
        for index in 0..count {
            let item = match collection {
                Collection::Live => file.item(index),
                Collection::Recovered => file.recovered_item(index),
            };
            match item {
                Ok(item) => reports.push(ItemReport::build(&file, &item, collection, index)?),
                Err(err) => {
                    tracing::warn!(collection = collection.as_str(), index, error = %err, "Unable to read item");
                }
            }
        }
    }

    match args.format {
        OutputFormat::Human => {
            let report = FileReport::build(&file, &args.source.display().to_string())?;
            print!("{}", format_file_report(&report, false));
            for item in &reports {
                print!("{}", format_item_report(item));
            }
            println!();
        }
        OutputFormat::Json => {
            let document = ExportDocument {
                file: FileReport::build(&file, &args.source.display().to_string())?,
                items: reports,
            };
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }

    Ok(())
}

/// Probe every path; returns how many carry the signature
pub fn run_detect(args: &DetectArgs) -> usize {
    let mut found = 0;
    for path in &args.paths {
        match check_file_signature(path) {
            Ok(true) => {
                found += 1;
                println!("  {} {}", "✓".green(), path.display());
            }
            Ok(false) => println!("  {} {} (not an MSIE cache file)", "✗".red(), path.display()),
            Err(err) => println!("  {} {} ({})", "!".yellow(), path.display(), err),
        }
    }
    found
}

pub fn run_config(args: &ConfigArgs) -> Result<()> {
    if args.path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }
    if args.init {
        Config::ensure_exists()?;
        println!("Config: {}", Config::default_path().display());
        return Ok(());
    }
    print!("{}", generate_sample_config());
    Ok(())
}
