use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use custody_config::log_cli_info;
use custody_engine::CustodyEngine;

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// File to encrypt and store
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Identity of the document owner
    #[arg(long)]
    owner: String,
}

pub async fn run(engine: &CustodyEngine, args: StoreArgs) -> Result<()> {
    let plaintext = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {:?}", args.file))?;

    let record = engine
        .store(&plaintext, &args.owner)
        .await
        .with_context(|| format!("Failed to store {:?}", args.file))?;
    log_cli_info!("Stored", id = record.id.as_str(), bytes = plaintext.len());

    println!("{}", serde_json::to_string_pretty(&record)?);
    for warning in record.warnings() {
        eprintln!("{} {}", style("warning:").yellow().bold(), warning);
    }
    Ok(())
}
