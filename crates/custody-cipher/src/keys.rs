//! Owner-bound composite key derivation.
//!
//! ```text
//! document_key  = random 32 bytes            (discarded after derivation)
//! owner_key     = SHA-256(owner_identity)
//! composite_key = SHA-256(document_key || owner_key)
//! ```
//!
//! The composite key is the cipher key for both directions and the only key
//! material that is ever persisted.

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::{Sha256Hash, IV_LEN};

/// Length of the random per-document key and of the composite key
pub const KEY_LEN: usize = 32;

/// `SHA-256` over the UTF-8 bytes of the owner identity.
pub fn derive_owner_key(owner_identity: &str) -> Sha256Hash {
    Sha256::digest(owner_identity.as_bytes()).into()
}

/// `SHA-256(base_key || owner_key)`.
pub fn composite_key(base_key: &[u8], owner_key: &Sha256Hash) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(base_key);
    hasher.update(owner_key);
    hasher.finalize().into()
}

/// Composite key and IV generated for a single document.
///
/// The key is wiped from memory on drop.
pub struct KeyMaterial {
    composite_key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl KeyMaterial {
    pub fn composite_key(&self) -> &[u8; KEY_LEN] {
        &self.composite_key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Hex form persisted as `keyMaterial`.
    pub fn key_hex(&self) -> String {
        hex::encode(self.composite_key)
    }

    /// Hex form persisted as `cipherIV`.
    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("composite_key", &"<redacted>")
            .field("iv", &self.iv_hex())
            .finish()
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.composite_key.zeroize();
    }
}

/// Generate a fresh random document key and IV, and fold the key with the
/// owner identity into the composite key. The random document key never
/// leaves this function.
pub fn new_document_key_material(owner_identity: &str) -> KeyMaterial {
    let mut rng = rand::rng();

    let mut document_key = Zeroizing::new([0u8; KEY_LEN]);
    rng.fill_bytes(&mut document_key[..]);

    let mut iv = [0u8; IV_LEN];
    rng.fill_bytes(&mut iv);

    let owner_key = derive_owner_key(owner_identity);
    KeyMaterial {
        composite_key: composite_key(&document_key[..], &owner_key),
        iv,
    }
}
