//! Test doubles for the engine's collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use custody_cas::{CacheError, DiskCache, LocalCache};
use custody_engine::{
    CustodyEngine, DocumentRecord, EnginePolicy, MemoryMetadataStore, MetadataError, MetadataStore,
    VerificationUpdate,
};
use custody_gateway::{ContentStore, ContentStoreError};
use custody_ledger::{AnchorError, AnchorLedger, AnchorMode, AnchorReceipt, AnchorRequest};
use tempfile::TempDir;

/// How the fake content store answers `put`
#[derive(Debug, Clone)]
pub enum PutBehavior {
    Accept,
    /// Never answers; the engine's timeout must fire
    Hang,
    Fail(ContentStoreError),
    /// Fail the first `n` calls with `Transport`, then accept
    FailFirst(u32),
}

/// In-memory content store with call counters
pub struct FakeContentStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    put_behavior: Mutex<PutBehavior>,
    get_fails: Mutex<bool>,
    put_delay: Duration,
    pub puts: AtomicU32,
    pub gets: AtomicU32,
    pub unpins: AtomicU32,
}

impl FakeContentStore {
    pub fn new(put_behavior: PutBehavior) -> Self {
        Self::with_delay(put_behavior, Duration::ZERO)
    }

    pub fn with_delay(put_behavior: PutBehavior, put_delay: Duration) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            put_behavior: Mutex::new(put_behavior),
            get_fails: Mutex::new(false),
            put_delay,
            puts: AtomicU32::new(0),
            gets: AtomicU32::new(0),
            unpins: AtomicU32::new(0),
        }
    }

    pub fn set_put_behavior(&self, behavior: PutBehavior) {
        *self.put_behavior.lock().unwrap() = behavior;
    }

    /// Make every `get` fail with `Timeout`.
    pub fn break_gets(&self) {
        *self.get_fails.lock().unwrap() = true;
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn blob(&self, address: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(address).cloned()
    }

    pub fn overwrite(&self, address: &str, data: Vec<u8>) {
        self.blobs.lock().unwrap().insert(address.to_string(), data);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentStore for FakeContentStore {
    async fn put(&self, data: &[u8]) -> Result<String, ContentStoreError> {
        let call = self.puts.fetch_add(1, Ordering::SeqCst);
        let behavior = self.put_behavior.lock().unwrap().clone();

        if !self.put_delay.is_zero() {
            tokio::time::sleep(self.put_delay).await;
        }

        match behavior {
            PutBehavior::Accept => {}
            PutBehavior::Hang => std::future::pending::<()>().await,
            PutBehavior::Fail(e) => return Err(e),
            PutBehavior::FailFirst(n) if call < n => {
                return Err(ContentStoreError::Transport("connection reset".into()))
            }
            PutBehavior::FailFirst(_) => {}
        }

        let address = format!("bafy{}", &custody_cipher::hash_hex(data)[..16]);
        self.blobs
            .lock()
            .unwrap()
            .insert(address.clone(), data.to_vec());
        Ok(address)
    }

    async fn get(&self, address: &str) -> Result<Vec<u8>, ContentStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if *self.get_fails.lock().unwrap() {
            return Err(ContentStoreError::Timeout);
        }
        self.blob(address).ok_or_else(|| ContentStoreError::NotFound {
            address: address.to_string(),
        })
    }

    async fn unpin(&self, address: &str) -> Result<(), ContentStoreError> {
        self.unpins.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().unwrap().remove(address);
        Ok(())
    }
}

/// Ledger that counts anchors and can be told to fail
pub struct CountingLedger {
    pub anchors: AtomicU32,
    failure: Option<AnchorError>,
    delay: Duration,
    pub requests: Mutex<Vec<AnchorRequest>>,
}

impl CountingLedger {
    pub fn ok() -> Self {
        Self {
            anchors: AtomicU32::new(0),
            failure: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: AnchorError) -> Self {
        Self {
            failure: Some(error),
            ..Self::ok()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::ok()
        }
    }

    pub fn anchors(&self) -> u32 {
        self.anchors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnchorLedger for CountingLedger {
    async fn anchor(&self, request: &AnchorRequest) -> Result<AnchorReceipt, AnchorError> {
        let n = self.anchors.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(e) = &self.failure {
            return Err(e.clone());
        }
        Ok(AnchorReceipt {
            tx_ref: format!("0x{:064x}", n + 1),
            block_ref: Some((100 + n).to_string()),
            document_id: None,
            mode: AnchorMode::Simple,
        })
    }

    fn mode(&self) -> AnchorMode {
        AnchorMode::Simple
    }
}

/// Cache whose writes always fail
pub struct FailingCache;

#[async_trait]
impl LocalCache for FailingCache {
    async fn put(&self, _id: &str, _data: &[u8]) -> Result<(), CacheError> {
        Err(CacheError::Io(std::io::Error::other("disk full")))
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, CacheError> {
        Err(CacheError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, _id: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    fn discard(&self, _id: &str) {}
}

/// DiskCache whose writes land only after a delay
pub struct SlowCache {
    pub inner: DiskCache,
    pub delay: Duration,
}

#[async_trait]
impl LocalCache for SlowCache {
    async fn put(&self, id: &str, data: &[u8]) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(id, data).await
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, CacheError> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, CacheError> {
        self.inner.delete(id).await
    }

    fn discard(&self, id: &str) {
        self.inner.discard(id)
    }
}

/// Metadata store whose `create` never completes
pub struct StuckMetadataStore;

#[async_trait]
impl MetadataStore for StuckMetadataStore {
    async fn create(&self, _record: &DocumentRecord) -> Result<(), MetadataError> {
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<DocumentRecord, MetadataError> {
        Err(MetadataError::NotFound { id: id.to_string() })
    }

    async fn update(&self, id: &str, _update: &VerificationUpdate) -> Result<(), MetadataError> {
        Err(MetadataError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, _id: &str) -> Result<bool, MetadataError> {
        Ok(false)
    }

    async fn list_by_owner(&self, _owner: &str) -> Result<Vec<DocumentRecord>, MetadataError> {
        Ok(Vec::new())
    }
}

/// In-memory metadata whose creates land late and whose updates are slow.
///
/// A create runs as its own task, so it still lands if the caller gives up,
/// the way a blocking filesystem write does.
pub struct DelayedMetadataStore {
    pub inner: Arc<MemoryMetadataStore>,
    create_delay: Duration,
    update_delay: Duration,
}

impl DelayedMetadataStore {
    pub fn new(create_delay: Duration, update_delay: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryMetadataStore::new()),
            create_delay,
            update_delay,
        }
    }
}

#[async_trait]
impl MetadataStore for DelayedMetadataStore {
    async fn create(&self, record: &DocumentRecord) -> Result<(), MetadataError> {
        let inner = self.inner.clone();
        let record = record.clone();
        let delay = self.create_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.create(&record).await
        })
        .await
        .unwrap()
    }

    async fn read(&self, id: &str) -> Result<DocumentRecord, MetadataError> {
        self.inner.read(id).await
    }

    async fn update(&self, id: &str, update: &VerificationUpdate) -> Result<(), MetadataError> {
        tokio::time::sleep(self.update_delay).await;
        self.inner.update(id, update).await
    }

    async fn delete(&self, id: &str) -> Result<bool, MetadataError> {
        self.inner.delete(id).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<DocumentRecord>, MetadataError> {
        self.inner.list_by_owner(owner).await
    }
}

/// Short timeouts so failure paths run fast
pub fn fast_policy() -> EnginePolicy {
    EnginePolicy {
        put_timeout: Duration::from_millis(100),
        put_attempts: 2,
        put_backoff: Duration::from_millis(10),
        get_timeout: Duration::from_millis(100),
        anchor_timeout: Duration::from_millis(100),
    }
}

/// Engine wired to fakes plus a real DiskCache in a temp dir
pub struct Harness {
    pub engine: Arc<CustodyEngine>,
    pub store: Arc<FakeContentStore>,
    pub ledger: Arc<CountingLedger>,
    pub cache: Arc<DiskCache>,
    pub metadata: Arc<MemoryMetadataStore>,
    _temp: TempDir,
}

impl Harness {
    pub fn new(store: FakeContentStore, ledger: CountingLedger) -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store);
        let ledger = Arc::new(ledger);
        let cache = Arc::new(DiskCache::new(temp.path().join("cache")).unwrap());
        let metadata = Arc::new(MemoryMetadataStore::new());

        let engine = CustodyEngine::new(store.clone(), cache.clone(), metadata.clone())
            .with_ledger(ledger.clone())
            .with_policy(fast_policy());

        Self {
            engine: Arc::new(engine),
            store,
            ledger,
            cache,
            metadata,
            _temp: temp,
        }
    }

    pub fn healthy() -> Self {
        Self::new(FakeContentStore::new(PutBehavior::Accept), CountingLedger::ok())
    }
}
