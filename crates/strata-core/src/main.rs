//! `strata` command line: configuration checks and computed field debugging

use anyhow::Context;
use clap::{value_parser, Arg, Command};
use std::path::{Path, PathBuf};
use strata_core::inspect::{compute_row, spec_counts};
use strata_spec::Config;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("strata")
        .version(strata_core::VERSION)
        .about("Strata graph document store tools")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a configuration file")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file (.json, .yaml, .yml or .toml)"),
                ),
        )
        .subcommand(
            Command::new("compute")
                .about("Evaluate a table spec's computed fields against a row")
                .arg(
                    Arg::new("path")
                        .long("path")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Configuration file"),
                )
                .arg(
                    Arg::new("spec")
                        .long("spec")
                        .required(true)
                        .help("Table specification id"),
                )
                .arg(
                    Arg::new("row")
                        .long("row")
                        .required(true)
                        .help("Row as a JSON object"),
                ),
        )
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = Config::from_path(path)?;
    let counts = spec_counts(&config)?;
    println!("{} is valid", path.display());
    for (store, kinds) in counts {
        println!("{store}:");
        for (kind, count) in kinds {
            println!("  {kind}: {count}");
        }
    }
    Ok(())
}

fn compute(path: &Path, spec: &str, row: &str) -> anyhow::Result<()> {
    let config = Config::from_path(path)?;
    let row: serde_json::Value = serde_json::from_str(row).context("--row is not valid JSON")?;
    let serde_json::Value::Object(row) = row else {
        anyhow::bail!("--row must be a JSON object");
    };
    let out = compute_row(&config, spec, row)?;
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let result = match matches.subcommand() {
        Some(("check-config", args)) => match args.get_one::<PathBuf>("path") {
            Some(path) => check_config(path),
            None => Err(anyhow::anyhow!("--path is required")),
        },
        Some(("compute", args)) => {
            let path = args.get_one::<PathBuf>("path");
            let spec = args.get_one::<String>("spec");
            let row = args.get_one::<String>("row");
            match (path, spec, row) {
                (Some(path), Some(spec), Some(row)) => compute(path, spec, row),
                _ => Err(anyhow::anyhow!("--path, --spec and --row are required")),
            }
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
