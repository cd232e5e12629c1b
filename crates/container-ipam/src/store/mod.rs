//! Key-value store adapters
//!
//! The store is the single source of truth for pools, assignments, endpoint
//! mappings, and lock records. Two implementations are provided:
//!
//! 1. **etcd** - the v2 keys API over HTTP, for real clusters
//! 2. **Memory** - process-local, for tests and single-host development

mod traits;

pub mod etcd;
pub mod memory;

pub use etcd::{EtcdStore, EtcdWatcher};
pub use memory::{MemoryStore, MemoryWatcher};
pub use traits::{EventKind, KeyValue, KvStore, WatchEvent, Watcher};

use crate::Result;

/// Delete a key, treating an absent key as already deleted.
/// Returns whether anything was removed.
pub async fn delete_if_present(store: &dyn KvStore, key: &str) -> Result<bool> {
    match store.delete(key).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_if_present() {
        let store = MemoryStore::new();
        store.set("/k", "v", None).await.unwrap();

        assert!(delete_if_present(&store, "/k").await.unwrap());
        assert!(!delete_if_present(&store, "/k").await.unwrap());
    }
}
