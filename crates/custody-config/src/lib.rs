//! # custody-config
//!
//! Configuration management for the custody engine.
//!
//! Loads configuration from:
//! 1. `~/.custody/config.toml` (global)
//! 2. `.custody/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! There is no process-wide config instance. Load a [`Config`] once at
//! startup and hand the relevant sections to each component.

pub mod logging;
pub mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use custody_gateway::{GatewayOptions, PinningCredentials};
use custody_ledger::{AnchorMode, LedgerOptions};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub ledger: LedgerConfig,
    pub engine: EngineConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(Path::new(".custody/config.toml")))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load and layer the given files. Missing files are skipped; keys set in
    /// `project` override the same keys in `global`.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Table = contents.parse()?;
                merge_tables(&mut merged, layer);
            }
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.custody/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".custody/config.toml"))
    }

    /// Apply environment variable overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CUSTODY_CACHE_ROOT") {
            self.storage.cache_root = PathBuf::from(path);
        }
        if let Some(path) = lookup("CUSTODY_METADATA_ROOT") {
            self.storage.metadata_root = PathBuf::from(path);
        }
        if let Some(key) = lookup("CUSTODY_GATEWAY_API_KEY") {
            self.gateway.api_key = Some(key);
        }
        if let Some(secret) = lookup("CUSTODY_GATEWAY_SECRET_KEY") {
            self.gateway.secret_key = Some(secret);
        }
        if let Some(url) = lookup("CUSTODY_LEDGER_RPC_URL") {
            self.ledger.rpc_url = Some(url);
        }
        if let Some(from) = lookup("CUSTODY_LEDGER_FROM") {
            self.ledger.from_address = Some(from);
        }
        if let Some(contract) = lookup("CUSTODY_LEDGER_CONTRACT") {
            self.ledger.contract_address = Some(contract);
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Local storage roots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Local fallback cache root
    pub cache_root: PathBuf,
    /// Directory holding one JSON file per document record
    pub metadata_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("~/.custody/cache"),
            metadata_root: PathBuf::from("~/.custody/records"),
        }
    }
}

impl StorageConfig {
    pub fn cache_root(&self) -> PathBuf {
        expand_home(&self.cache_root)
    }

    pub fn metadata_root(&self) -> PathBuf {
        expand_home(&self.metadata_root)
    }
}

/// Remote content store (pinning service)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub api_url: String,
    pub gateway_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let defaults = GatewayOptions::default();
        Self {
            api_url: defaults.api_url,
            gateway_url: defaults.gateway_url,
            api_key: None,
            secret_key: None,
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

impl GatewayConfig {
    /// Client options; credentials are set only when both keys are present.
    pub fn options(&self) -> GatewayOptions {
        let credentials = match (&self.api_key, &self.secret_key) {
            (Some(api_key), Some(secret_key)) => Some(PinningCredentials {
                api_key: api_key.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        };
        GatewayOptions {
            api_url: self.api_url.clone(),
            gateway_url: self.gateway_url.clone(),
            credentials,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Anchoring ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Anchoring is disabled when no RPC endpoint is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    pub mode: AnchorMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price_wei: Option<u64>,
    pub request_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_poll_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let defaults = LedgerOptions::default();
        Self {
            rpc_url: None,
            from_address: None,
            mode: defaults.mode,
            contract_address: None,
            gas_price_wei: None,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            receipt_poll_interval_ms: defaults.receipt_poll_interval.as_millis() as u64,
            receipt_poll_attempts: defaults.receipt_poll_attempts,
        }
    }
}

impl LedgerConfig {
    /// Client options, or `None` when anchoring is not configured.
    pub fn options(&self) -> Option<LedgerOptions> {
        let rpc_url = self.rpc_url.clone()?;
        let from_address = self.from_address.clone()?;
        Some(LedgerOptions {
            rpc_url,
            from_address,
            mode: self.mode,
            contract_address: self.contract_address.clone(),
            gas_price_wei: self.gas_price_wei,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            receipt_poll_interval: Duration::from_millis(self.receipt_poll_interval_ms),
            receipt_poll_attempts: self.receipt_poll_attempts,
        })
    }
}

/// Retry and timeout policy for the custody engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for a single remote put attempt
    pub put_timeout_ms: u64,
    /// Remote put attempts before falling back to the local cache
    pub put_attempts: u32,
    /// Base backoff between put attempts, doubled after each failure
    pub put_backoff_ms: u64,
    pub get_timeout_ms: u64,
    pub anchor_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            put_timeout_ms: 10_000,
            put_attempts: 2,
            put_backoff_ms: 200,
            get_timeout_ms: 15_000,
            anchor_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    pub fn put_timeout(&self) -> Duration {
        Duration::from_millis(self.put_timeout_ms)
    }

    pub fn put_backoff(&self) -> Duration {
        Duration::from_millis(self.put_backoff_ms)
    }

    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    pub fn anchor_timeout(&self) -> Duration {
        Duration::from_millis(self.anchor_timeout_ms)
    }
}
