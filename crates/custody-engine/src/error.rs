use custody_cas::CacheError;
use custody_cipher::CipherError;
use custody_gateway::ContentStoreError;
use thiserror::Error;

use crate::metadata::MetadataError;

/// Errors surfaced by [`crate::CustodyEngine`].
///
/// Remote store and ledger failures during `store` are absorbed by the
/// degradation policy and only appear here when the local cache failed too.
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error("Encryption error: {0}")]
    Encryption(#[from] CipherError),

    #[error("Owner identity must not be empty")]
    EmptyOwner,

    #[error("Document could not be stored: remote store failed ({remote}), local cache failed ({local})")]
    StorageFailed {
        remote: ContentStoreError,
        #[source]
        local: CacheError,
    },

    #[error("Ciphertext unavailable for document {id}")]
    ContentUnavailable { id: String },

    #[error("Integrity violation for document {id}: decrypted content does not match its hash")]
    IntegrityViolation { id: String },

    #[error("Legacy document {id} could not be recovered with any known key scheme")]
    UnrecoverableLegacyDocument { id: String },

    #[error("Metadata store error: {0}")]
    Metadata(#[from] MetadataError),
}

pub type Result<T> = std::result::Result<T, CustodyError>;
