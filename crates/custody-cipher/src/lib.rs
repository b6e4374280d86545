//! # custody-cipher
//!
//! Cryptographic primitives for the document custody engine.
//!
//! - Content hashing: SHA-256 over the raw plaintext, hex-encoded.
//! - Owner-bound key derivation: `composite = SHA-256(document_key || SHA-256(owner))`.
//! - Symmetric encryption: AES-CBC with PKCS#7 padding.
//!
//! ## Trust Model
//!
//! CBC decryption under a wrong key usually fails with a padding error, but a
//! small fraction of wrong keys produce valid-looking padding and garbage
//! plaintext. Callers must never trust a decryption without comparing the
//! result against the stored content hash (see [`verify_integrity`]).

mod aes_cbc;
mod keys;

pub use aes_cbc::{decrypt, encrypt, IV_LEN};
pub use keys::{composite_key, derive_owner_key, new_document_key_material, KeyMaterial, KEY_LEN};

use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// SHA-256 digest (32 bytes)
pub type Sha256Hash = [u8; 32];

/// Errors raised by the cipher layer
#[derive(Error, Debug)]
pub enum CipherError {
    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    #[error("invalid IV length: {0} bytes (expected 16)")]
    InvalidIvLength(usize),

    #[error("invalid hex in {field}: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },

    #[error("decryption failed: bad padding or ciphertext length")]
    Padding,
}

pub type Result<T> = std::result::Result<T, CipherError>;

/// Compute the SHA-256 digest of the given bytes.
#[inline]
pub fn compute_hash(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

/// Content hash of a plaintext: lowercase hex SHA-256 (64 characters).
pub fn hash_hex(data: &[u8]) -> String {
    hex::encode(compute_hash(data))
}

/// MD5 digest. Only used to rebuild legacy key candidates.
pub fn md5_digest(data: &[u8]) -> [u8; 16] {
    Md5::digest(data).into()
}

/// Check that `s` has the shape of a content hash (64 hex characters).
pub fn is_content_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Recompute the content hash of `plaintext` and compare it with `content_hash`.
///
/// Hex case is ignored. A malformed `content_hash` never verifies.
pub fn verify_integrity(plaintext: &[u8], content_hash: &str) -> bool {
    is_content_hash(content_hash) && hash_hex(plaintext).eq_ignore_ascii_case(content_hash)
}

/// Decode a hex field, tagging errors with the field name.
pub fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|source| CipherError::Hex { field, source })
}
