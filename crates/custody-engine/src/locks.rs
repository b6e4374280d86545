//! Per-document serialization within one process.
//!
//! Each `(owner, content hash)` key maps to an async mutex guarding an
//! optional completed record. The first `store` to take the lock does the
//! work and leaves its record in the slot; callers queued behind it find the
//! record and return it instead of storing again. Slots are dropped from the
//! table once nobody holds or waits on them.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::record::DocumentRecord;

pub(crate) type FlightKey = (String, String);
type Slot = Arc<Mutex<Option<DocumentRecord>>>;

#[derive(Debug, Default)]
pub(crate) struct FlightTable {
    slots: DashMap<FlightKey, Slot>,
}

impl FlightTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn acquire(&self, key: FlightKey) -> FlightGuard<'_> {
        let slot = self.slots.entry(key.clone()).or_default().clone();
        let guard = slot.lock_owned().await;
        FlightGuard {
            table: self,
            key,
            guard,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

/// Exclusive access to one slot; releases and prunes on drop.
pub(crate) struct FlightGuard<'a> {
    table: &'a FlightTable,
    key: FlightKey,
    guard: OwnedMutexGuard<Option<DocumentRecord>>,
}

impl Deref for FlightGuard<'_> {
    type Target = Option<DocumentRecord>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for FlightGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // One reference in the table, one in our guard: nobody is waiting.
        self.table
            .slots
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) <= 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(owner: &str) -> FlightKey {
        (owner.to_string(), "ab".repeat(32))
    }

    #[tokio::test]
    async fn test_slot_pruned_after_release() {
        let table = FlightTable::new();
        {
            let guard = table.acquire(key("alice")).await;
            assert!(guard.is_none());
            assert_eq!(table.len(), 1);
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let table = FlightTable::new();
        let _a = table.acquire(key("alice")).await;
        let b = tokio::time::timeout(Duration::from_millis(100), table.acquire(key("bob"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_sees_leader_result() {
        let table = Arc::new(FlightTable::new());

        let mut leader = table.acquire(key("alice")).await;

        let waiter_table = table.clone();
        let waiter = tokio::spawn(async move {
            let guard = waiter_table.acquire(key("alice")).await;
            guard.as_ref().map(|r| r.id.clone())
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        *leader = Some(crate::record::DocumentRecord {
            id: "first".to_string(),
            owner_identity: "alice".to_string(),
            content_hash: "ab".repeat(32),
            cipher_iv: "00".repeat(16),
            key_material: "11".repeat(32),
            storage_address: None,
            anchor_reference: None,
            storage_mode: crate::record::StorageMode::LocalFallback,
            verified: false,
            scheme_version: crate::record::SchemeVersion::Current,
            created_at: chrono::Utc::now(),
        });
        drop(leader);

        assert_eq!(waiter.await.unwrap(), Some("first".to_string()));
        assert_eq!(table.len(), 0);
    }
}
