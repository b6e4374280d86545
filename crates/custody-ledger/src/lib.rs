//! # custody-ledger
//!
//! Proof-of-custody anchoring on an append-only ledger.
//!
//! An anchor is a best-effort public record that a document with a given
//! content hash was stored at a given address. Two modes are supported,
//! chosen by configuration:
//!
//! - **simple**: a zero-value self-transfer carrying `DOC:<hash prefix>` as data.
//! - **contract**: a call into a custody registry contract that records
//!   `(content hash, storage address, key material reference, owner)` and
//!   emits a `DocumentStored` event with the registry's document id.
//!
//! Anchoring never decides whether a document is retrievable; callers treat
//! every [`AnchorError`] as non-fatal.

pub mod abi;
mod json_rpc;
mod rpc;

pub use json_rpc::{JsonRpcLedger, LedgerOptions};
pub use rpc::RpcClient;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a ledger client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    #[error("Ledger request timed out")]
    Timeout,

    #[error("Custody contract unavailable: {0}")]
    ContractUnavailable(String),

    #[error("Insufficient funds to pay for anchoring")]
    InsufficientFunds,

    #[error("Ledger RPC error: {0}")]
    Rpc(String),

    #[error("Ledger transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, AnchorError>;

/// How anchors are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    #[default]
    Simple,
    Contract,
}

impl fmt::Display for AnchorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnchorMode::Simple => write!(f, "simple"),
            AnchorMode::Contract => write!(f, "contract"),
        }
    }
}

impl FromStr for AnchorMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(AnchorMode::Simple),
            "contract" => Ok(AnchorMode::Contract),
            other => Err(format!("unknown anchor mode: {}", other)),
        }
    }
}

/// What gets anchored for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRequest {
    /// Hex SHA-256 of the plaintext
    pub content_hash: String,
    /// Content address returned by the remote store
    pub storage_address: String,
    /// Fingerprint of the key material, never the key itself
    pub key_material_ref: String,
    pub owner_identity: String,
}

/// Reference to a written anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReceipt {
    /// Transaction hash
    pub tx_ref: String,
    /// Block number, `None` if the transaction was not mined while polling
    pub block_ref: Option<String>,
    /// Registry document id (contract mode only)
    pub document_id: Option<String>,
    pub mode: AnchorMode,
}

/// Append-only proof-of-custody ledger.
#[async_trait]
pub trait AnchorLedger: Send + Sync {
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt>;

    fn mode(&self) -> AnchorMode;
}

/// Deterministic 20-byte ledger address for an owner identity: the first 20
/// bytes of `SHA-256(owner_identity)`.
pub fn owner_address(owner_identity: &str) -> [u8; 20] {
    let digest = custody_cipher::derive_owner_key(owner_identity);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[..20]);
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_mode_parsing() {
        assert_eq!("simple".parse::<AnchorMode>().unwrap(), AnchorMode::Simple);
        assert_eq!(" Contract ".parse::<AnchorMode>().unwrap(), AnchorMode::Contract);
        assert!("chain".parse::<AnchorMode>().is_err());
        assert_eq!(AnchorMode::Contract.to_string(), "contract");
    }

    #[test]
    fn test_owner_address_is_sha256_prefix() {
        let address = owner_address("abc");
        assert_eq!(
            hex::encode(address),
            "ba7816bf8f01cfea414140de5dae2223b00361a3"
        );
    }

    #[test]
    fn test_receipt_serde_roundtrip() {
        let receipt = AnchorReceipt {
            tx_ref: "0xabc".to_string(),
            block_ref: Some("42".to_string()),
            document_id: None,
            mode: AnchorMode::Simple,
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(json.contains("\"mode\":\"simple\""));
        let parsed: AnchorReceipt = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, receipt);
    }
}
