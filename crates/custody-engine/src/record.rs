//! Document records.
//!
//! A record is everything needed to find, decrypt and check one stored
//! document. The only secret it carries is `key_material`, which is never
//! printed by `Debug`.

use std::fmt;

use chrono::{DateTime, Utc};
use custody_ledger::AnchorReceipt;
use serde::{Deserialize, Serialize};

/// Where the ciphertext ended up at store time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Remote,
    LocalFallback,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Remote => write!(f, "remote"),
            StorageMode::LocalFallback => write!(f, "local_fallback"),
        }
    }
}

/// Key scheme that produced `key_material`.
///
/// Records written before scheme tagging have no tag at all; they, and any
/// tag this build does not know, are treated as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemeVersion {
    Current,
    Legacy,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SchemeVersion {
    pub fn is_current(&self) -> bool {
        matches!(self, SchemeVersion::Current)
    }
}

/// Degradation visible on a successful store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreWarning {
    /// Remote store unavailable; ciphertext is only in the local cache
    LocalFallback,
    /// No anchor was recorded
    AnchorMissing,
}

impl fmt::Display for StoreWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreWarning::LocalFallback => write!(f, "stored in local fallback cache only"),
            StoreWarning::AnchorMissing => write!(f, "no ledger anchor recorded"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub owner_identity: String,
    /// Hex SHA-256 of the plaintext
    pub content_hash: String,
    #[serde(rename = "cipherIV")]
    pub cipher_iv: String,
    /// Hex cipher key
    pub key_material: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_reference: Option<AnchorReceipt>,
    pub storage_mode: StorageMode,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub scheme_version: SchemeVersion,
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn warnings(&self) -> Vec<StoreWarning> {
        let mut warnings = Vec::new();
        if self.storage_mode == StorageMode::LocalFallback {
            warnings.push(StoreWarning::LocalFallback);
        }
        if self.anchor_reference.is_none() {
            warnings.push(StoreWarning::AnchorMissing);
        }
        warnings
    }

    /// `(owner, content hash)`, the unit of per-document serialization.
    pub(crate) fn flight_key(&self) -> (String, String) {
        (self.owner_identity.clone(), self.content_hash.to_ascii_lowercase())
    }
}

impl fmt::Debug for DocumentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRecord")
            .field("id", &self.id)
            .field("owner_identity", &self.owner_identity)
            .field("content_hash", &self.content_hash)
            .field("cipher_iv", &self.cipher_iv)
            .field("key_material", &"<redacted>")
            .field("storage_address", &self.storage_address)
            .field("anchor_reference", &self.anchor_reference)
            .field("storage_mode", &self.storage_mode)
            .field("verified", &self.verified)
            .field("scheme_version", &self.scheme_version)
            .field("created_at", &self.created_at)
            .finish()
    }
}
