//! Document record persistence.
//!
//! The engine only needs create, read-by-id, a narrow verification update,
//! and delete. Two backends are provided:
//!
//! - [`MemoryMetadataStore`]: in-process map, for tests and embedding
//! - [`FsMetadataStore`]: one JSON file per record, written atomically

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::record::{DocumentRecord, SchemeVersion};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Document record not found: {id}")]
    NotFound { id: String },

    #[error("Document record already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Invalid document id: {id:?}")]
    InvalidId { id: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Fields a retrieval may write back to a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationUpdate {
    pub verified: bool,
    pub scheme_version: SchemeVersion,
    pub key_material: String,
}

impl VerificationUpdate {
    pub fn from_record(record: &DocumentRecord) -> Self {
        Self {
            verified: record.verified,
            scheme_version: record.scheme_version,
            key_material: record.key_material.clone(),
        }
    }

    fn apply(&self, record: &mut DocumentRecord) {
        record.verified = self.verified;
        record.scheme_version = self.scheme_version;
        record.key_material = self.key_material.clone();
    }
}

/// External document metadata store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new record. Fails if the id is taken.
    async fn create(&self, record: &DocumentRecord) -> Result<()>;

    async fn read(&self, id: &str) -> Result<DocumentRecord>;

    /// Overwrite the verification fields of an existing record.
    async fn update(&self, id: &str, update: &VerificationUpdate) -> Result<()>;

    /// Remove a record. Returns `false` if it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Every record held for `owner_identity`, oldest first.
    async fn list_by_owner(&self, owner_identity: &str) -> Result<Vec<DocumentRecord>>;
}

/// Oldest first, id as tie-break so listings are stable.
fn sort_listing(records: &mut [DocumentRecord]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// In-memory [`MetadataStore`]
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: DashMap<String, DocumentRecord>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, record: &DocumentRecord) -> Result<()> {
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(MetadataError::AlreadyExists {
                id: record.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn read(&self, id: &str) -> Result<DocumentRecord> {
        self.records
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| MetadataError::NotFound { id: id.to_string() })
    }

    async fn update(&self, id: &str, update: &VerificationUpdate) -> Result<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| MetadataError::NotFound { id: id.to_string() })?;
        update.apply(&mut record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.remove(id).is_some())
    }

    async fn list_by_owner(&self, owner_identity: &str) -> Result<Vec<DocumentRecord>> {
        let mut records: Vec<DocumentRecord> = self
            .records
            .iter()
            .filter(|r| r.owner_identity == owner_identity)
            .map(|r| r.value().clone())
            .collect();
        sort_listing(&mut records);
        Ok(records)
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem [`MetadataStore`]: `<root>/<id>.json`
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn record_path(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !valid {
            return Err(MetadataError::InvalidId { id: id.to_string() });
        }
        Ok(self.root.join(format!("{}.json", id)))
    }

    fn load(path: &Path, id: &str) -> Result<DocumentRecord> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(MetadataError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write via temp file and rename. `create_new` refuses to replace an
    /// existing record.
    fn save(path: &Path, record: &DocumentRecord, create_new: bool) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let temp_path = path.with_extension(format!(
            "{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let result = (|| {
            let mut file = std::fs::File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            if create_new {
                // hard_link fails if the target exists
                std::fs::hard_link(&temp_path, path)?;
                std::fs::remove_file(&temp_path)
            } else {
                std::fs::rename(&temp_path, path)
            }
        })();

        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            if create_new && e.kind() == io::ErrorKind::AlreadyExists {
                return Err(MetadataError::AlreadyExists {
                    id: record.id.clone(),
                });
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| MetadataError::Io(io::Error::other(e)))?
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    #[instrument(skip(self, record), fields(id = %record.id), level = "debug")]
    async fn create(&self, record: &DocumentRecord) -> Result<()> {
        let path = self.record_path(&record.id)?;
        let record = record.clone();
        Self::blocking(move || Self::save(&path, &record, true)).await?;
        debug!("Record created");
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<DocumentRecord> {
        let path = self.record_path(id)?;
        let id = id.to_string();
        Self::blocking(move || Self::load(&path, &id)).await
    }

    #[instrument(skip(self, update), level = "debug")]
    async fn update(&self, id: &str, update: &VerificationUpdate) -> Result<()> {
        let path = self.record_path(id)?;
        let id = id.to_string();
        let update = update.clone();
        Self::blocking(move || {
            let mut record = Self::load(&path, &id)?;
            update.apply(&mut record);
            Self::save(&path, &record, false)
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.record_path(id)?;
        Self::blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_by_owner(&self, owner_identity: &str) -> Result<Vec<DocumentRecord>> {
        let root = self.root.clone();
        let owner = owner_identity.to_string();
        Self::blocking(move || {
            let mut records = Vec::new();
            for entry in std::fs::read_dir(&root)? {
                let path = entry?.path();
                // in-flight writes end in `.tmp`
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                    continue;
                };
                match Self::load(&path, &id) {
                    Ok(record) if record.owner_identity == owner => records.push(record),
                    Ok(_) => {}
                    // removed between listing and reading
                    Err(MetadataError::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            sort_listing(&mut records);
            debug!(count = records.len(), "Listed records");
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StorageMode;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(id: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            owner_identity: "bob".to_string(),
            content_hash: "cd".repeat(32),
            cipher_iv: "00".repeat(16),
            key_material: "22".repeat(32),
            storage_address: None,
            anchor_reference: None,
            storage_mode: StorageMode::LocalFallback,
            verified: false,
            scheme_version: SchemeVersion::Legacy,
            created_at: Utc::now(),
        }
    }

    fn upgrade() -> VerificationUpdate {
        VerificationUpdate {
            verified: true,
            scheme_version: SchemeVersion::Current,
            key_material: "33".repeat(32),
        }
    }

    async fn exercise(store: &dyn MetadataStore) {
        let rec = record("doc-a");
        store.create(&rec).await.unwrap();
        assert!(matches!(
            store.create(&rec).await,
            Err(MetadataError::AlreadyExists { .. })
        ));
        assert_eq!(store.read("doc-a").await.unwrap(), rec);

        store.update("doc-a", &upgrade()).await.unwrap();
        let updated = store.read("doc-a").await.unwrap();
        assert!(updated.verified);
        assert_eq!(updated.scheme_version, SchemeVersion::Current);
        assert_eq!(updated.key_material, "33".repeat(32));
        assert_eq!(updated.content_hash, rec.content_hash);
        assert_eq!(updated.cipher_iv, rec.cipher_iv);

        assert!(store.delete("doc-a").await.unwrap());
        assert!(!store.delete("doc-a").await.unwrap());
        assert!(matches!(
            store.read("doc-a").await,
            Err(MetadataError::NotFound { .. })
        ));
        assert!(matches!(
            store.update("doc-a", &upgrade()).await,
            Err(MetadataError::NotFound { .. })
        ));
    }

    async fn exercise_listing(store: &dyn MetadataStore) {
        let mut first = record("list-1");
        first.owner_identity = "carol".to_string();
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        let mut second = record("list-2");
        second.owner_identity = "carol".to_string();
        let other = record("list-3");

        for rec in [&second, &other, &first] {
            store.create(rec).await.unwrap();
        }

        let ids: Vec<String> = store
            .list_by_owner("carol")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["list-1".to_string(), "list-2".to_string()]);
        assert_eq!(store.list_by_owner("bob").await.unwrap(), vec![other]);
        assert!(store.list_by_owner("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_lists_by_owner() {
        exercise_listing(&MemoryMetadataStore::new()).await;
    }

    #[tokio::test]
    async fn test_fs_store_lists_by_owner() {
        let temp = TempDir::new().unwrap();
        let store = FsMetadataStore::new(temp.path()).unwrap();
        // a leftover temp file from an interrupted write is not a record
        std::fs::write(temp.path().join("list-9.123.0.tmp"), b"{partial").unwrap();
        exercise_listing(&store).await;
    }

    #[tokio::test]
    async fn test_memory_store_lifecycle() {
        let store = MemoryMetadataStore::new();
        exercise(&store).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fs_store_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = FsMetadataStore::new(temp.path()).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_fs_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let rec = record("doc-b");
        FsMetadataStore::new(temp.path())
            .unwrap()
            .create(&rec)
            .await
            .unwrap();

        let reopened = FsMetadataStore::new(temp.path()).unwrap();
        assert_eq!(reopened.read("doc-b").await.unwrap(), rec);
    }

    #[tokio::test]
    async fn test_fs_store_rejects_path_ids() {
        let temp = TempDir::new().unwrap();
        let store = FsMetadataStore::new(temp.path()).unwrap();
        for id in ["", "../escape", "a/b", "x.json"] {
            assert!(matches!(
                store.read(id).await,
                Err(MetadataError::InvalidId { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_fs_store_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = FsMetadataStore::new(temp.path()).unwrap();
        store.create(&record("doc-c")).await.unwrap();
        store.update("doc-c", &upgrade()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc-c.json".to_string()]);
    }
}
