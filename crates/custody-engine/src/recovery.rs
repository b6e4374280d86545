//! Legacy key recovery.
//!
//! Older records persisted `key_material` inconsistently: sometimes the key
//! actually used, sometimes a value the key was derived from. Recovery walks
//! a fixed, ordered list of candidate keys and accepts the first one whose
//! decryption matches the stored content hash.
//!
//! ```text
//! 1. raw            key_material as the cipher key
//! 2. sha256         SHA-256(key_material)   decoded bytes, then hex text
//!    md5            MD5(key_material)       decoded bytes, then hex text (AES-128)
//! 3. prefix         first 32 bytes of key_material (leading 64 hex chars)
//! 4. composite      SHA-256(key_material || SHA-256(owner variant))
//!                   variants: as stored, lower, upper, trimmed, no whitespace
//! ```
//!
//! A candidate that decrypts without a padding error but fails the hash check
//! is rejected like any other failure.

use std::fmt;

use custody_cipher::{composite_key, compute_hash, decrypt, derive_owner_key, md5_digest, verify_integrity, IV_LEN, KEY_LEN};
use custody_config::log_recovery_debug;
use zeroize::Zeroizing;

use crate::record::DocumentRecord;

/// Which rule produced a candidate key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Raw,
    Sha256OfKey,
    Sha256OfKeyText,
    Md5OfKey,
    Md5OfKeyText,
    Prefix,
    Composite { owner_variant: String },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Raw => "raw",
            Strategy::Sha256OfKey => "sha256",
            Strategy::Sha256OfKeyText => "sha256_text",
            Strategy::Md5OfKey => "md5",
            Strategy::Md5OfKeyText => "md5_text",
            Strategy::Prefix => "prefix",
            Strategy::Composite { .. } => "composite",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A key to try, tagged with the rule that produced it
pub struct KeyCandidate {
    pub strategy: Strategy,
    pub key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KeyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCandidate")
            .field("strategy", &self.strategy)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Successful recovery
pub struct Recovered {
    pub plaintext: Vec<u8>,
    pub strategy: Strategy,
    /// Hex form of the key that worked, persisted on upgrade
    pub key_hex: String,
}

impl fmt::Debug for Recovered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recovered")
            .field("plaintext_len", &self.plaintext.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Ordered legacy decryption search with a hash gate
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyRecoveryResolver;

impl LegacyRecoveryResolver {
    pub fn new() -> Self {
        Self
    }

    /// Candidate keys for `record`, in the order they are tried.
    ///
    /// Rules that need decoded key bytes are skipped when `key_material` is
    /// not valid hex; the prefix rule only needs the first 64 characters to be
    /// hex. Duplicate keys are tried once.
    pub fn candidates(&self, record: &DocumentRecord) -> Vec<KeyCandidate> {
        let text = record.key_material.trim();
        let decoded = hex::decode(text).ok().map(Zeroizing::new);
        let mut out: Vec<KeyCandidate> = Vec::new();

        let mut push = |strategy: Strategy, key: Vec<u8>| {
            let key = Zeroizing::new(key);
            if out.iter().all(|c| *c.key != *key) {
                out.push(KeyCandidate { strategy, key });
            }
        };

        if let Some(bytes) = &decoded {
            push(Strategy::Raw, bytes.to_vec());
            push(Strategy::Sha256OfKey, compute_hash(bytes).to_vec());
        }
        push(Strategy::Sha256OfKeyText, compute_hash(text.as_bytes()).to_vec());
        if let Some(bytes) = &decoded {
            push(Strategy::Md5OfKey, md5_digest(bytes).to_vec());
        }
        push(Strategy::Md5OfKeyText, md5_digest(text.as_bytes()).to_vec());

        // Only the leading 64 hex characters matter; anything after may be damaged.
        if let Some(prefix) = text.get(..KEY_LEN * 2).and_then(|p| hex::decode(p).ok()) {
            push(Strategy::Prefix, prefix);
        }

        if let Some(bytes) = &decoded {
            let mut variants: Vec<String> = Vec::new();
            for variant in owner_variants(&record.owner_identity) {
                if !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
            for variant in variants {
                let key = composite_key(bytes, &derive_owner_key(&variant));
                push(
                    Strategy::Composite {
                        owner_variant: variant,
                    },
                    key.to_vec(),
                );
            }
        }

        out
    }

    /// Try every candidate against `ciphertext`. `None` means exhaustion.
    pub fn recover(&self, record: &DocumentRecord, ciphertext: &[u8]) -> Option<Recovered> {
        let iv = match hex::decode(record.cipher_iv.trim()) {
            Ok(iv) if iv.len() == IV_LEN => iv,
            _ => {
                log_recovery_debug!("Stored IV is unusable", id = record.id.as_str());
                return None;
            }
        };

        for candidate in self.candidates(record) {
            let plaintext = match decrypt(ciphertext, &candidate.key, &iv) {
                Ok(p) => p,
                Err(e) => {
                    log_recovery_debug!(
                        "Candidate failed to decrypt",
                        id = record.id.as_str(),
                        strategy = candidate.strategy.name(),
                        error = tracing::field::display(&e),
                    );
                    continue;
                }
            };

            if !verify_integrity(&plaintext, &record.content_hash) {
                log_recovery_debug!(
                    "Candidate decrypted but failed the hash check",
                    id = record.id.as_str(),
                    strategy = candidate.strategy.name(),
                );
                continue;
            }

            log_recovery_debug!(
                "Candidate matched",
                id = record.id.as_str(),
                strategy = candidate.strategy.name(),
            );
            return Some(Recovered {
                plaintext,
                key_hex: hex::encode(&*candidate.key),
                strategy: candidate.strategy,
            });
        }

        None
    }
}

/// Owner spellings a legacy record may have been keyed with.
fn owner_variants(owner: &str) -> [String; 5] {
    [
        owner.to_string(),
        owner.to_lowercase(),
        owner.to_uppercase(),
        owner.trim().to_string(),
        owner.chars().filter(|c| !c.is_whitespace()).collect(),
    ]
}
