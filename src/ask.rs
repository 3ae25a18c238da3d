use std::io::{self, Write};

use anyhow::{Context, Result};
use log::info;

use crate::{
    bridge::{CompletionClient, QueryBridge},
    cli::AskArgs,
    config::AppConfig,
    dataset::Dataset,
    ingest, table,
};

pub fn execute(args: &AskArgs) -> Result<()> {
    let config = AppConfig::load_optional(args.config.as_deref())?;
    let dataset = ingest::load_dataset(&args.input.input, &args.input.load_options()?)
        .with_context(|| format!("Loading {:?}", args.input.input))?;
    answer(
        &args.question,
        &dataset,
        &config,
        args.bridge.api_key.as_deref(),
    )
}

/// Resolves the credential, asks the configured service, and prints the plan
/// followed by its result to stdout.
pub fn answer(
    question: &str,
    dataset: &Dataset,
    config: &AppConfig,
    api_key: Option<&str>,
) -> Result<()> {
    let bridge_config = config.bridge.resolve(api_key)?;
    info!(
        "Asking {} via {}",
        bridge_config.model, bridge_config.endpoint
    );
    let bridge = QueryBridge::from_config(bridge_config)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    answer_with(&bridge, question, dataset, &mut handle)
}

/// Writes the proposed plan before running it, so a plan that fails against
/// the data is still visible.
pub fn answer_with<C: CompletionClient, W: Write>(
    bridge: &QueryBridge<C>,
    question: &str,
    dataset: &Dataset,
    out: &mut W,
) -> Result<()> {
    let plan = bridge.translate(question, dataset)?;
    let rendered = serde_json::to_string_pretty(&plan).context("Serializing query plan")?;
    writeln!(out, "Query plan:\n{rendered}\n").context("Writing query plan")?;
    let result = bridge.execute(&plan, dataset)?;
    write!(out, "{}", table::render_table(&result.headers, &result.rows))
        .context("Writing query result")?;
    Ok(())
}
