//! # custody-engine
//!
//! Encrypted, content-addressed document custody.
//!
//! [`CustodyEngine`] encrypts a document under an owner-bound key, puts the
//! ciphertext in a remote content store (or a local cache when the remote is
//! down), anchors a proof of custody on a ledger when it can, and persists a
//! [`DocumentRecord`]. Retrieval decrypts and re-checks the content hash;
//! records written under older key schemes go through
//! [`LegacyRecoveryResolver`] and are upgraded on success.
//!
//! All collaborators are trait objects handed in at construction:
//!
//! | trait | crate | provided backend |
//! |---|---|---|
//! | `ContentStore` | `custody-gateway` | `PinningGateway` |
//! | `LocalCache` | `custody-cas` | `DiskCache` |
//! | `AnchorLedger` | `custody-ledger` | `JsonRpcLedger` |
//! | [`MetadataStore`] | this crate | [`MemoryMetadataStore`], [`FsMetadataStore`] |

mod engine;
mod error;
mod locks;
pub mod metadata;
pub mod record;
pub mod recovery;

pub use engine::{CustodyEngine, EnginePolicy};
pub use error::{CustodyError, Result};
pub use metadata::{FsMetadataStore, MemoryMetadataStore, MetadataError, MetadataStore, VerificationUpdate};
pub use record::{DocumentRecord, SchemeVersion, StorageMode, StoreWarning};
pub use recovery::{LegacyRecoveryResolver, Recovered, Strategy};
