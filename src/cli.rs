use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::{ingest::LoadOptions, io_utils, roles::SelectionRequest};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Summarize transaction spreadsheets by month and category",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the worksheets of an .xlsx/.xls/.ods workbook
    Sheets(SheetsArgs),
    /// Profile every column and show which roles it can play
    Columns(ColumnsArgs),
    /// Render the monthly and per-group dashboard for a sheet or CSV file
    Summary(SummaryArgs),
    /// Answer a natural-language question with a generated query plan
    Ask(AskArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Workbook (.xlsx, .xls, .ods) or delimited text file to read
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Worksheet name (defaults to the first sheet)
    #[arg(long)]
    pub sheet: Option<String>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of delimited input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

impl InputArgs {
    pub fn load_options(&self) -> Result<LoadOptions<'_>> {
        Ok(LoadOptions {
            sheet: self.sheet.as_deref(),
            delimiter: self.delimiter,
            encoding: io_utils::resolve_encoding(self.input_encoding.as_deref())?,
        })
    }
}

#[derive(Debug, Args)]
pub struct SheetsArgs {
    /// Workbook to inspect
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
}

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Emit the profiles as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Date column (defaults to the first column whose name contains "date")
    #[arg(long = "date")]
    pub date: Option<String>,
    /// Numeric column to total (defaults to the first measure candidate)
    #[arg(long = "measure")]
    pub measure: Option<String>,
    /// Category column to group and filter by (defaults to the first group candidate)
    #[arg(long = "group")]
    pub group: Option<String>,
}

impl SelectionArgs {
    pub fn request(&self) -> SelectionRequest<'_> {
        SelectionRequest {
            date: self.date.as_deref(),
            measure: self.measure.as_deref(),
            group: self.group.as_deref(),
        }
    }
}

#[derive(Debug, Args)]
pub struct BridgeArgs {
    /// API key for the completion service (overrides the configured env var)
    #[arg(long = "api-key")]
    pub api_key: Option<String>,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// Keep only these group values (comma-separated or repeated; all when omitted)
    #[arg(long = "only", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub only: Vec<String>,
    /// Count rows without a usable date in the total and top groups
    #[arg(long = "include-undated")]
    pub include_undated: bool,
    /// Number of rows shown in the data preview
    #[arg(long = "preview-rows", default_value_t = 5)]
    pub preview_rows: usize,
    /// Write the monthly summary as CSV to this path ("-" for stdout)
    #[arg(short = 'o', long = "export")]
    pub export: Option<PathBuf>,
    /// Print the dashboard as JSON instead of text
    #[arg(long)]
    pub json: bool,
    /// Question to answer after the summary is rendered
    #[arg(long = "ask")]
    pub ask: Option<String>,
    #[command(flatten)]
    pub bridge: BridgeArgs,
    /// YAML settings file (undated_rows policy, bridge model/endpoint/timeout)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AskArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// The question, e.g. "Which category spent the most in March?"
    #[arg(short = 'q', long = "question")]
    pub question: String,
    #[command(flatten)]
    pub bridge: BridgeArgs,
    /// YAML settings file (bridge model/endpoint/timeout, api_key_env)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
