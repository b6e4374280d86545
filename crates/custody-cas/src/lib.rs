//! # custody-cas
//!
//! Durable local fallback storage for encrypted custody blobs.
//!
//! The cache is only written when the remote content store cannot accept a
//! blob, and only read when the remote copy is missing or unreachable. Entries
//! are keyed by document id; the id is hashed with BLAKE3 to get a
//! filesystem-safe name and a 3-level fan-out.
//!
//! ## Directory Layout
//!
//! ```text
//! <cache_root>/
//! └── blake3/
//!     └── ab/
//!         └── cd/
//!             └── abcd1234...efgh   # BLAKE3(document id)
//! ```
//!
//! Writes go to a uniquely named `.tmp` file and are renamed into place, so a
//! reader never observes a half-written entry. The write runs on the blocking
//! pool and finishes even if the calling future is dropped, so an entry is
//! either absent or complete.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument, warn};

/// Errors that can occur during cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Cache entry not found: {id}")]
    NotFound { id: String },

    #[error("Invalid cache key: document id must not be empty")]
    EmptyId,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Local fallback blob storage keyed by document id.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Durably store `data` under `id`, replacing any previous entry.
    async fn put(&self, id: &str, data: &[u8]) -> Result<()>;

    /// Fetch the entry stored under `id`.
    async fn get(&self, id: &str) -> Result<Vec<u8>>;

    /// Remove the entry under `id`. Returns `false` if nothing was stored.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Synchronous best-effort removal, usable from `Drop` when an
    /// operation that wrote the entry is abandoned.
    fn discard(&self, id: &str);
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Filesystem-backed [`LocalCache`].
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Create a cache rooted at the given directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the root path of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Hashed, filesystem-safe key for a document id.
    pub fn entry_key(id: &str) -> String {
        blake3::hash(id.as_bytes()).to_hex().to_string()
    }

    /// Path where the entry for `id` lives: `blake3/ab/cd/<key>`.
    pub fn entry_path(&self, id: &str) -> PathBuf {
        let key = Self::entry_key(id);
        let l1 = &key[..2];
        let l2 = &key[2..4];
        self.root.join("blake3").join(l1).join(l2).join(&key)
    }

    /// Check whether an entry exists for `id`.
    pub fn exists(&self, id: &str) -> bool {
        self.entry_path(id).exists()
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(CacheError::EmptyId);
        }
        Ok(())
    }
}

/// Write `data` to `path` via a uniquely named temp file and an atomic rename.
///
/// On any failure the temp file is removed before returning.
fn write_atomic(path: &Path, key: &str, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Unique temp name so concurrent writers never share a file
    let temp_name = format!(
        "{}.{}.{}.tmp",
        key,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let temp_path = path.with_file_name(&temp_name);

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

#[async_trait]
impl LocalCache for DiskCache {
    #[instrument(skip(self, data), fields(bytes = data.len()), level = "debug")]
    async fn put(&self, id: &str, data: &[u8]) -> Result<()> {
        Self::check_id(id)?;
        let path = self.entry_path(id);
        let key = Self::entry_key(id);
        let data = data.to_vec();

        // Runs to completion even if this future is dropped
        let written = tokio::task::spawn_blocking(move || write_atomic(&path, &key, &data))
            .await
            .map_err(io::Error::other)?;
        written?;

        debug!(id, "Cached blob");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, id: &str) -> Result<Vec<u8>> {
        Self::check_id(id)?;
        match fs::read(self.entry_path(id)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CacheError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(&self, id: &str) -> Result<bool> {
        Self::check_id(id)?;
        match fs::remove_file(self.entry_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    fn discard(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        if let Err(e) = std::fs::remove_file(self.entry_path(id)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(id, error = %e, "Failed to discard abandoned cache entry");
            }
        }
    }
}
