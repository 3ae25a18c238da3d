pub mod aggregate;
pub mod ask;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod dataset;
pub mod error;
pub mod export;
pub mod expr;
pub mod filter;
pub mod ingest;
pub mod io_utils;
pub mod months;
pub mod query;
pub mod roles;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Cli, ColumnsArgs, Commands, SheetsArgs};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("ledger_lens", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sheets(args) => handle_sheets(&args),
        Commands::Columns(args) => handle_columns(&args),
        Commands::Summary(args) => dashboard::execute(&args),
        Commands::Ask(args) => ask::execute(&args),
    }
}

fn handle_sheets(args: &SheetsArgs) -> Result<()> {
    let names = ingest::sheet_names(&args.input)
        .with_context(|| format!("Listing sheets of {:?}", args.input))?;
    info!("Workbook {:?} has {} sheet(s)", args.input, names.len());
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn handle_columns(args: &ColumnsArgs) -> Result<()> {
    if let Some(delimiter) = args.input.delimiter {
        info!(
            "Profiling '{}' with delimiter '{}'",
            args.input.input.display(),
            printable_delimiter(delimiter)
        );
    }
    let dataset = ingest::load_dataset(&args.input.input, &args.input.load_options()?)
        .with_context(|| format!("Loading {:?}", args.input.input))?;
    let role_set = roles::classify(&dataset);
    if args.json {
        let rendered =
            serde_json::to_string_pretty(&role_set).context("Serializing column profiles")?;
        println!("{rendered}");
        return Ok(());
    }
    let headers = ["column", "type", "distinct", "missing", "roles"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = role_set
        .profiles
        .iter()
        .map(|profile| {
            let roles = if profile.is_unclassified() {
                "-".to_string()
            } else {
                profile
                    .roles
                    .iter()
                    .map(|role| role.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            vec![
                profile.name.clone(),
                profile.datatype.to_string(),
                profile.distinct.to_string(),
                profile.missing.to_string(),
                roles,
            ]
        })
        .collect::<Vec<_>>();
    table::print_table(&headers, &rows);
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
