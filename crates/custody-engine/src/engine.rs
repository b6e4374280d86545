//! Store and retrieve orchestration.
//!
//! ```text
//! store:    hash -> derive key -> encrypt            (no lock)
//!           [lock (owner, hash)]
//!           remote put (timeout, bounded retries) | local cache put
//!           anchor (remote only, timeout, best-effort)
//!           metadata create
//!
//! retrieve: [lock (owner, hash)]
//!           remote get (timeout) | local cache get
//!           [unlock]
//!           current scheme: decrypt + hash check, else IntegrityViolation
//!           otherwise:      legacy recovery, else UnrecoverableLegacyDocument
//! ```

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use custody_cas::{CacheError, LocalCache};
use custody_cipher::{decode_hex, decrypt, encrypt, hash_hex, new_document_key_material, verify_integrity, KeyMaterial};
use custody_config::{
    log_cache_warn, log_engine_debug, log_engine_info, log_engine_warn, log_gateway_debug, log_gateway_warn,
    log_ledger_info, log_ledger_warn, log_recovery_info, log_recovery_warn, EngineConfig,
};
use custody_gateway::{ContentStore, ContentStoreError};
use custody_ledger::{AnchorLedger, AnchorReceipt, AnchorRequest};
use tokio::time::{sleep, timeout};
use tracing::field::display;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CustodyError, Result};
use crate::locks::FlightTable;
use crate::metadata::{MetadataError, MetadataStore, VerificationUpdate};
use crate::record::{DocumentRecord, SchemeVersion, StorageMode};
use crate::recovery::LegacyRecoveryResolver;

/// Timeouts and retry bounds for remote calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePolicy {
    pub put_timeout: Duration,
    /// Total remote put attempts; values below 1 are treated as 1
    pub put_attempts: u32,
    /// Delay before the second attempt, doubled for each later one
    pub put_backoff: Duration,
    pub get_timeout: Duration,
    pub anchor_timeout: Duration,
}

impl From<&EngineConfig> for EnginePolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            put_timeout: config.put_timeout(),
            put_attempts: config.put_attempts,
            put_backoff: config.put_backoff(),
            get_timeout: config.get_timeout(),
            anchor_timeout: config.anchor_timeout(),
        }
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

/// Encrypted document custody over injected collaborators.
pub struct CustodyEngine {
    content_store: Arc<dyn ContentStore>,
    cache: Arc<dyn LocalCache>,
    metadata: Arc<dyn MetadataStore>,
    ledger: Option<Arc<dyn AnchorLedger>>,
    resolver: LegacyRecoveryResolver,
    policy: EnginePolicy,
    flights: FlightTable,
}

impl CustodyEngine {
    /// Engine without a ledger; every record will carry `AnchorMissing`.
    pub fn new(
        content_store: Arc<dyn ContentStore>,
        cache: Arc<dyn LocalCache>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            content_store,
            cache,
            metadata,
            ledger: None,
            resolver: LegacyRecoveryResolver::new(),
            policy: EnginePolicy::default(),
            flights: FlightTable::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn AnchorLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Encrypt and persist `plaintext` for `owner_identity`.
    ///
    /// Remote store and ledger failures degrade the record instead of failing
    /// the call (see [`DocumentRecord::warnings`]). Concurrent calls with the
    /// same owner and content share one result.
    #[instrument(skip(self, plaintext, owner_identity), fields(bytes = plaintext.len()), level = "debug")]
    pub async fn store(&self, plaintext: &[u8], owner_identity: &str) -> Result<DocumentRecord> {
        if owner_identity.is_empty() {
            return Err(CustodyError::EmptyOwner);
        }

        let content_hash = hash_hex(plaintext);
        let key = new_document_key_material(owner_identity);
        let ciphertext = encrypt(plaintext, key.composite_key(), key.iv())?;

        let mut flight = self
            .flights
            .acquire((owner_identity.to_string(), content_hash.clone()))
            .await;
        if let Some(existing) = flight.as_ref() {
            log_engine_debug!("Joined concurrent store", id = existing.id.as_str());
            return Ok(existing.clone());
        }

        let id = Uuid::new_v4().to_string();
        let mut pending = PendingCacheEntry::new(self.cache.clone(), id.clone());

        let remote = self.put_remote(&ciphertext).await;
        let (storage_mode, storage_address) = match remote {
            Ok(address) => (StorageMode::Remote, Some(address)),
            Err(remote) => {
                log_engine_warn!(
                    "Remote store unavailable, using local fallback cache",
                    id = id.as_str(),
                    error = display(&remote),
                );
                if let Err(local) = pending.write(ciphertext).await {
                    log_cache_warn!("Local fallback write failed", id = id.as_str(), error = display(&local));
                    return Err(CustodyError::StorageFailed { remote, local });
                }
                (StorageMode::LocalFallback, None)
            }
        };

        let anchor_reference = match (&storage_address, &self.ledger) {
            (Some(address), Some(ledger)) => {
                self.anchor(ledger.as_ref(), &content_hash, address, &key, owner_identity)
                    .await
            }
            _ => None,
        };

        let record = DocumentRecord {
            id,
            owner_identity: owner_identity.to_string(),
            content_hash,
            cipher_iv: key.iv_hex(),
            key_material: key.key_hex(),
            storage_address,
            anchor_reference,
            storage_mode,
            verified: false,
            scheme_version: SchemeVersion::Current,
            created_at: Utc::now(),
        };

        if let Err(e) = pending.create_record(self.metadata.clone(), &record).await {
            // `pending` drops armed and removes any local entry
            if let Some(address) = &record.storage_address {
                self.unpin_best_effort(address).await;
            }
            return Err(e.into());
        }
        pending.commit();

        for warning in record.warnings() {
            log_engine_warn!(
                "Document stored with degradation",
                id = record.id.as_str(),
                warning = display(&warning),
            );
        }
        log_engine_info!(
            "Document stored",
            id = record.id.as_str(),
            mode = display(&record.storage_mode),
        );

        *flight = Some(record.clone());
        Ok(record)
    }

    /// Fetch, decrypt and hash-check `record`. Unverified plaintext is never
    /// returned. `verified`, and for legacy records `scheme_version` and
    /// `key_material`, are updated in place and written through.
    #[instrument(skip(self, record), fields(id = %record.id), level = "debug")]
    pub async fn retrieve(&self, record: &mut DocumentRecord) -> Result<Vec<u8>> {
        let ciphertext = {
            let _flight = self.flights.acquire(record.flight_key()).await;
            self.fetch_ciphertext(record).await?
        };

        if record.scheme_version.is_current() {
            let plaintext = decrypt_current(record, &ciphertext)?;
            if !record.verified {
                record.verified = true;
                self.write_back(record).await;
            }
            return Ok(plaintext);
        }

        match self.resolver.recover(record, &ciphertext) {
            Some(recovered) => {
                log_recovery_info!(
                    "Legacy document recovered, upgrading record",
                    id = record.id.as_str(),
                    strategy = recovered.strategy.name(),
                );
                record.scheme_version = SchemeVersion::Current;
                record.key_material = recovered.key_hex;
                record.verified = true;
                self.write_back(record).await;
                Ok(recovered.plaintext)
            }
            None => {
                log_recovery_warn!("Legacy recovery exhausted", id = record.id.as_str());
                Err(CustodyError::UnrecoverableLegacyDocument {
                    id: record.id.clone(),
                })
            }
        }
    }

    /// Read a record by id and retrieve it.
    pub async fn retrieve_by_id(&self, id: &str) -> Result<Vec<u8>> {
        let mut record = self.metadata.read(id).await?;
        self.retrieve(&mut record).await
    }

    pub async fn record(&self, id: &str) -> Result<DocumentRecord> {
        Ok(self.metadata.read(id).await?)
    }

    /// Records held for `owner_identity`, oldest first.
    pub async fn documents(&self, owner_identity: &str) -> Result<Vec<DocumentRecord>> {
        Ok(self.metadata.list_by_owner(owner_identity).await?)
    }

    /// Remove the record and local entry, then best-effort unpin the remote
    /// blob. Returns the removed record.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, id: &str) -> Result<DocumentRecord> {
        let record = self.metadata.read(id).await?;
        let _flight = self.flights.acquire(record.flight_key()).await;

        self.metadata.delete(id).await?;

        if let Err(e) = self.cache.delete(id).await {
            log_cache_warn!("Failed to delete local entry", id = id, error = display(&e));
        }
        if let Some(address) = &record.storage_address {
            self.unpin_best_effort(address).await;
        }

        log_engine_info!("Document deleted", id = id);
        Ok(record)
    }

    /// Whether `plaintext` hashes to `content_hash`.
    pub fn verify_integrity(&self, plaintext: &[u8], content_hash: &str) -> bool {
        verify_integrity(plaintext, content_hash)
    }

    async fn put_remote(&self, ciphertext: &[u8]) -> std::result::Result<String, ContentStoreError> {
        let attempts = self.policy.put_attempts.max(1);
        let mut backoff = self.policy.put_backoff;
        let mut last_error = ContentStoreError::Timeout;

        for attempt in 1..=attempts {
            let outcome = match timeout(self.policy.put_timeout, self.content_store.put(ciphertext)).await {
                Ok(result) => result,
                Err(_) => Err(ContentStoreError::Timeout),
            };

            match outcome {
                Ok(address) => return Ok(address),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    log_gateway_debug!("Remote put attempt failed", attempt = attempt, error = display(&e));
                    last_error = e;
                }
            }

            if attempt < attempts {
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        Err(last_error)
    }

    async fn fetch_ciphertext(&self, record: &DocumentRecord) -> Result<Vec<u8>> {
        if record.storage_mode == StorageMode::Remote {
            if let Some(address) = &record.storage_address {
                match timeout(self.policy.get_timeout, self.content_store.get(address)).await {
                    Ok(Ok(bytes)) => return Ok(bytes),
                    Ok(Err(e)) => {
                        log_gateway_warn!("Remote get failed, trying local cache", id = record.id.as_str(), error = display(&e));
                    }
                    Err(_) => {
                        log_gateway_warn!("Remote get timed out, trying local cache", id = record.id.as_str());
                    }
                }
            }
        }

        self.cache.get(&record.id).await.map_err(|e| {
            log_engine_debug!("Local cache miss", id = record.id.as_str(), error = display(&e));
            CustodyError::ContentUnavailable {
                id: record.id.clone(),
            }
        })
    }

    async fn anchor(
        &self,
        ledger: &dyn AnchorLedger,
        content_hash: &str,
        storage_address: &str,
        key: &KeyMaterial,
        owner_identity: &str,
    ) -> Option<AnchorReceipt> {
        let request = AnchorRequest {
            content_hash: content_hash.to_string(),
            storage_address: storage_address.to_string(),
            key_material_ref: hash_hex(key.composite_key()),
            owner_identity: owner_identity.to_string(),
        };

        match timeout(self.policy.anchor_timeout, ledger.anchor(&request)).await {
            Ok(Ok(receipt)) => {
                log_ledger_info!("Document anchored", tx = receipt.tx_ref.as_str(), mode = display(&receipt.mode));
                Some(receipt)
            }
            Ok(Err(e)) => {
                log_ledger_warn!("Anchoring failed, continuing without anchor", error = display(&e));
                None
            }
            Err(_) => {
                log_ledger_warn!("Anchoring timed out, continuing without anchor");
                None
            }
        }
    }

    async fn write_back(&self, record: &DocumentRecord) {
        let update = VerificationUpdate::from_record(record);
        if let Err(e) = self.metadata.update(&record.id, &update).await {
            log_engine_warn!("Failed to persist verification state", id = record.id.as_str(), error = display(&e));
        }
    }

    async fn unpin_best_effort(&self, address: &str) {
        if let Err(e) = self.content_store.unpin(address).await {
            log_gateway_warn!("Failed to unpin remote blob", address = address, error = display(&e));
        }
    }
}

/// Decrypt with the record's own key and require a hash match.
fn decrypt_current(record: &DocumentRecord, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let key = zeroize::Zeroizing::new(decode_hex("key_material", &record.key_material)?);
    let iv = decode_hex("cipher_iv", &record.cipher_iv)?;

    let violation = || CustodyError::IntegrityViolation {
        id: record.id.clone(),
    };
    let plaintext = decrypt(ciphertext, &key, &iv).map_err(|e| {
        log_engine_warn!("Current-scheme decryption failed", id = record.id.as_str(), error = display(&e));
        violation()
    })?;
    if !verify_integrity(&plaintext, &record.content_hash) {
        log_engine_warn!("Content hash mismatch", id = record.id.as_str());
        return Err(violation());
    }
    Ok(plaintext)
}

/// Local cache entry written during a `store` that has not committed yet.
///
/// The cache write and the metadata create each run as separate tasks, so
/// both land even if the `store` future is dropped. A shared state decides
/// the outcome exactly once: the create task moves it to committed, or a
/// drop while still pending moves it to abandoned. Whichever side loses the
/// race cleans up, so an abandoned store leaves neither a cache entry nor a
/// record pointing at one.
struct PendingCacheEntry {
    cache: Arc<dyn LocalCache>,
    id: String,
    state: Arc<AtomicU8>,
    armed: bool,
}

const PENDING: u8 = 0;
const COMMITTED: u8 = 1;
const ABANDONED: u8 = 2;

impl PendingCacheEntry {
    fn new(cache: Arc<dyn LocalCache>, id: String) -> Self {
        Self {
            cache,
            id,
            state: Arc::new(AtomicU8::new(PENDING)),
            armed: false,
        }
    }

    async fn write(&mut self, data: Vec<u8>) -> std::result::Result<(), CacheError> {
        self.armed = true;
        let cache = self.cache.clone();
        let id = self.id.clone();
        let state = self.state.clone();

        let task = tokio::spawn(async move {
            let result = cache.put(&id, &data).await;
            if result.is_ok() && state.load(Ordering::SeqCst) == ABANDONED {
                cache.discard(&id);
            }
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(CacheError::Io(io::Error::other(e))),
        }
    }

    /// Persist `record`. If the store was abandoned while the create ran,
    /// the record and any local entry are removed again.
    async fn create_record(
        &self,
        metadata: Arc<dyn MetadataStore>,
        record: &DocumentRecord,
    ) -> std::result::Result<(), MetadataError> {
        let cache = self.cache.clone();
        let state = self.state.clone();
        let armed = self.armed;
        let record = record.clone();

        let task = tokio::spawn(async move {
            metadata.create(&record).await?;
            if state
                .compare_exchange(PENDING, COMMITTED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                log_engine_debug!("Store abandoned during record create, rolling back", id = record.id.as_str());
                if let Err(e) = metadata.delete(&record.id).await {
                    log_engine_warn!("Failed to roll back abandoned record", id = record.id.as_str(), error = display(&e));
                }
                if armed {
                    cache.discard(&record.id);
                }
            }
            Ok::<(), MetadataError>(())
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(MetadataError::Io(io::Error::other(e))),
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingCacheEntry {
    fn drop(&mut self) {
        if self.armed
            && self
                .state
                .compare_exchange(PENDING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            self.cache.discard(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_config() {
        let config = EngineConfig {
            put_timeout_ms: 1500,
            put_attempts: 3,
            put_backoff_ms: 50,
            get_timeout_ms: 700,
            anchor_timeout_ms: 900,
        };
        let policy = EnginePolicy::from(&config);
        assert_eq!(policy.put_timeout, Duration::from_millis(1500));
        assert_eq!(policy.put_attempts, 3);
        assert_eq!(policy.put_backoff, Duration::from_millis(50));
        assert_eq!(policy.get_timeout, Duration::from_millis(700));
        assert_eq!(policy.anchor_timeout, Duration::from_millis(900));
    }

    #[test]
    fn test_default_policy_matches_default_config() {
        let policy = EnginePolicy::default();
        assert_eq!(policy.put_attempts, 2);
        assert_eq!(policy.put_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_decrypt_current_rejects_bad_hex() {
        let record = DocumentRecord {
            id: "d".to_string(),
            owner_identity: "o".to_string(),
            content_hash: hash_hex(b"x"),
            cipher_iv: "zz".to_string(),
            key_material: "11".repeat(32),
            storage_address: None,
            anchor_reference: None,
            storage_mode: StorageMode::LocalFallback,
            verified: false,
            scheme_version: SchemeVersion::Current,
            created_at: Utc::now(),
        };
        assert!(matches!(
            decrypt_current(&record, &[0u8; 16]),
            Err(CustodyError::Encryption(_))
        ));
    }
}
