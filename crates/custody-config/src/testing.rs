//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary cache roots
//! - Temporary metadata roots
//! - A `Config` pointing at both
//!
//! # Usage
//!
//! ```ignore
//! use custody_config::testing::TestEnvironment;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     // env.cache_root and env.metadata_root are isolated per test
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique storage roots
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Isolated local cache root
    pub cache_root: PathBuf,
    /// Isolated metadata record directory
    pub metadata_root: PathBuf,
    /// Scratch space for input and output files
    pub work_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let cache_root = root.join("cache");
        let metadata_root = root.join("records");
        let work_dir = root.join("work");

        std::fs::create_dir_all(&cache_root)?;
        std::fs::create_dir_all(&metadata_root)?;
        std::fs::create_dir_all(&work_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            cache_root,
            metadata_root,
            work_dir,
            test_id,
        })
    }

    /// Default config with storage roots redirected into this environment.
    /// Remote collaborators are left unconfigured.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.cache_root = self.cache_root.clone();
        cfg.storage.metadata_root = self.metadata_root.clone();
        cfg
    }

    /// Create a file in the work directory
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.work_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.cache_root.exists());
        assert!(env.metadata_root.exists());
        assert!(env.work_dir.exists());
    }

    #[test]
    fn test_environments_are_isolated() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.cache_root, env2.cache_root);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_config_points_at_environment() {
        let env = TestEnvironment::new().unwrap();
        let cfg = env.config();
        assert_eq!(cfg.storage.cache_root(), env.cache_root);
        assert_eq!(cfg.storage.metadata_root(), env.metadata_root);
        assert!(cfg.gateway.options().credentials.is_none());
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("docs/a.txt", b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
