//! # custody CLI
//!
//! Store, retrieve and inspect encrypted documents from the command line.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use custody_config::logging::{init_logging, LogLevel};
use custody_config::{log_cli_debug, Config};
use custody_engine::CustodyEngine;

mod retrieve;
mod store;
mod wiring;

/// Encrypted, content-addressed document custody
#[derive(Parser)]
#[command(name = "custody")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log level used when neither CUSTODY_LOG nor RUST_LOG is set
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and store a file, printing its record as JSON
    Store(store::StoreArgs),

    /// Decrypt a stored document by record id
    Retrieve(retrieve::RetrieveArgs),

    /// Check a file against a content hash
    Verify {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Expected hex SHA-256 of the file
        #[arg(long)]
        hash: String,
    },

    /// Print a document record as JSON
    Show {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// List the records held for an owner, oldest first
    List {
        /// Identity of the document owner
        #[arg(long)]
        owner: String,

        /// Print full records as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Remove a document record, its local copy and its remote pin
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Commands::Config => {
            print!("{}", Config::default_toml()?);
            Ok(())
        }
        Commands::Verify { file, hash } => verify(&file, &hash),
        Commands::Store(args) => store::run(&open_engine()?, args).await,
        Commands::Retrieve(args) => retrieve::run(&open_engine()?, args).await,
        Commands::Show { id } => {
            let record = open_engine()?
                .record(&id)
                .await
                .with_context(|| format!("No record {}", id))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::List { owner, json } => {
            let records = open_engine()?
                .documents(&owner)
                .await
                .with_context(|| format!("Failed to list documents for {}", owner))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    println!(
                        "{}  {}  {}  {}",
                        record.id,
                        record.content_hash,
                        record.storage_address.as_deref().unwrap_or("-"),
                        record.created_at.to_rfc3339()
                    );
                }
            }
            Ok(())
        }
        Commands::Delete { id } => {
            let record = open_engine()?
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete {}", id))?;
            eprintln!("Deleted {} ({})", record.id, record.content_hash);
            Ok(())
        }
    }
}

fn open_engine() -> Result<CustodyEngine> {
    let config = Config::load().context("Failed to load configuration")?;
    log_cli_debug!(
        "Configuration loaded",
        cache_root = tracing::field::debug(config.storage.cache_root()),
        metadata_root = tracing::field::debug(config.storage.metadata_root()),
    );
    wiring::build_engine(&config)
}

fn verify(file: &std::path::Path, hash: &str) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    if !custody_cipher::verify_integrity(&data, hash) {
        bail!(
            "hash mismatch: expected {}, got {}",
            hash,
            custody_cipher::hash_hex(&data)
        );
    }
    println!("OK {}", hash.to_ascii_lowercase());
    Ok(())
}
