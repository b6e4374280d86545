//! Builds a `CustodyEngine` from loaded configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use custody_cas::DiskCache;
use custody_config::{log_cli_debug, Config};
use custody_engine::{CustodyEngine, EnginePolicy, FsMetadataStore};
use custody_gateway::PinningGateway;
use custody_ledger::JsonRpcLedger;

pub fn build_engine(config: &Config) -> Result<CustodyEngine> {
    let cache_root = config.storage.cache_root();
    let cache = DiskCache::new(&cache_root)
        .with_context(|| format!("Failed to open cache at {:?}", cache_root))?;

    let metadata_root = config.storage.metadata_root();
    let metadata = FsMetadataStore::new(&metadata_root)
        .with_context(|| format!("Failed to open record store at {:?}", metadata_root))?;

    let gateway = PinningGateway::new(config.gateway.options()).context("Failed to build gateway client")?;

    let mut engine = CustodyEngine::new(Arc::new(gateway), Arc::new(cache), Arc::new(metadata))
        .with_policy(EnginePolicy::from(&config.engine));

    match config.ledger.options() {
        Some(options) => {
            log_cli_debug!("Ledger anchoring enabled", mode = tracing::field::display(&options.mode));
            let ledger = JsonRpcLedger::new(options).context("Failed to build ledger client")?;
            engine = engine.with_ledger(Arc::new(ledger));
        }
        None => log_cli_debug!("No ledger configured, records will not be anchored"),
    }

    Ok(engine)
}
