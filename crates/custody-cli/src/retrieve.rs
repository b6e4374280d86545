use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use custody_engine::CustodyEngine;

#[derive(Args, Debug)]
pub struct RetrieveArgs {
    /// Record id returned by `store`
    #[arg(value_name = "ID")]
    id: String,

    /// Write the plaintext here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

pub async fn run(engine: &CustodyEngine, args: RetrieveArgs) -> Result<()> {
    let plaintext = engine
        .retrieve_by_id(&args.id)
        .await
        .with_context(|| format!("Failed to retrieve {}", args.id))?;

    match &args.output {
        Some(path) => tokio::fs::write(path, &plaintext)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&plaintext)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
