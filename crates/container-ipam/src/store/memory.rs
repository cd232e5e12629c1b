//! In-memory store
//!
//! Implements the full [`KvStore`] contract, including TTL expiry and
//! recursive watches, inside one process. Used by tests and single-host setups.

use super::traits::{KeyValue, KvStore, WatchEvent, Watcher};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: &str, ttl: Option<Duration>) -> Self {
        Self {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local key-value store
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            events,
        }
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every live key in order
    pub fn keys(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);
        entries.keys().cloned().collect()
    }

    fn normalize(key: &str) -> String {
        let trimmed = key.trim_end_matches('/');
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Drop expired entries, emitting a delete event for each
    fn purge_expired(&self, entries: &mut BTreeMap<String, Entry>) {
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = entries.remove(&key) {
                self.publish(WatchEvent::new(key, None, Some(entry.value)));
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);

        if let Some(entry) = entries.get(&key) {
            return Ok(entry.value.clone());
        }

        // Implicit directory
        let dir_prefix = format!("{}/", key);
        if entries.range(dir_prefix.clone()..).next().is_some_and(|(k, _)| k.starts_with(&dir_prefix)) {
            return Ok(String::new());
        }

        Err(Error::NotFound(key))
    }

    async fn get_children(&self, dir: &str) -> Result<Vec<KeyValue>> {
        let dir = Self::normalize(dir);
        let prefix = format!("{}/", dir);
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);

        let mut children: Vec<KeyValue> = Vec::new();
        for (key, entry) in entries.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((child, _)) => {
                    let child_key = format!("{}{}", prefix, child);
                    if children.last().map(|c| c.key.as_str()) != Some(child_key.as_str()) {
                        children.push(KeyValue {
                            key: child_key,
                            value: String::new(),
                        });
                    }
                }
                None => children.push(KeyValue {
                    key: key.clone(),
                    value: entry.value.clone(),
                }),
            }
        }

        children.sort_by(|a, b| a.key.cmp(&b.key));
        children.dedup_by(|a, b| a.key == b.key);
        Ok(children)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);

        let prev = entries.insert(key.clone(), Entry::new(value, ttl));
        self.publish(WatchEvent::new(
            key,
            Some(value.to_string()),
            prev.map(|e| e.value),
        ));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = Self::normalize(key);
        let dir_prefix = format!("{}/", key);
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);

        let doomed: Vec<String> = entries
            .keys()
            .filter(|k| **k == key || k.starts_with(&dir_prefix))
            .cloned()
            .collect();

        if doomed.is_empty() {
            return Err(Error::NotFound(key));
        }

        for k in doomed {
            if let Some(entry) = entries.remove(&k) {
                self.publish(WatchEvent::new(k, None, Some(entry.value)));
            }
        }
        Ok(())
    }

    async fn create_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let key = Self::normalize(key);
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries);

        if entries.contains_key(&key) {
            return Err(Error::AlreadyExists(key));
        }

        entries.insert(key.clone(), Entry::new(value, ttl));
        self.publish(WatchEvent::new(key, Some(value.to_string()), None));
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<Box<dyn Watcher>> {
        Ok(Box::new(MemoryWatcher {
            prefix: Self::normalize(prefix),
            rx: self.events.subscribe(),
        }))
    }
}

/// Watch handle over the store's broadcast channel
pub struct MemoryWatcher {
    prefix: String,
    rx: broadcast::Receiver<WatchEvent>,
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&mut self) -> Result<WatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key.starts_with(&self.prefix) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    return Err(Error::StoreUnavailable(format!(
                        "watch on {} fell behind by {} events",
                        self.prefix, missed
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::StoreUnavailable("store closed".to_string()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();
        store.set("/a/b", "1", None).await.unwrap();

        assert_eq!(store.get("/a/b").await.unwrap(), "1");
        assert!(store.get("/a/c").await.unwrap_err().is_not_found());
        // Parent directory exists implicitly
        assert_eq!(store.get("/a").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_children_sorted_and_collapsed() {
        let store = MemoryStore::new();
        store.set("/n/pool/10.0.2.2", "", None).await.unwrap();
        store.set("/n/pool/10.0.2.1", "", None).await.unwrap();
        store.set("/n/assigned/host/10.0.2.3", "", None).await.unwrap();
        store.set("/n/config", "{}", None).await.unwrap();

        let children = store.get_children("/n").await.unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["assigned", "config", "pool"]);

        let pool = store.get_children("/n/pool").await.unwrap();
        let names: Vec<&str> = pool.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["10.0.2.1", "10.0.2.2"]);

        assert!(store.get_children("/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_recursive() {
        let store = MemoryStore::new();
        store.set("/n/pool/10.0.2.1", "", None).await.unwrap();
        store.set("/n/pool/10.0.2.2", "", None).await.unwrap();
        store.set("/n/config", "{}", None).await.unwrap();

        store.delete("/n/pool").await.unwrap();
        assert!(store.get_children("/n/pool").await.unwrap().is_empty());
        assert_eq!(store.len(), 1);

        assert!(store.delete("/n/pool").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_create_if_absent() {
        let store = MemoryStore::new();
        store.create_if_absent("/lock", "lock", None).await.unwrap();
        let err = store.create_if_absent("/lock", "lock", None).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .create_if_absent("/lock", "lock", Some(Duration::from_secs(5)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.exists("/lock").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("/lock").await.unwrap());
        store.create_if_absent("/lock", "lock", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_filters_prefix() {
        let store = MemoryStore::new();
        let mut watcher = store.watch("/n").await.unwrap();

        store.set("/other/x", "1", None).await.unwrap();
        store.set("/n/x", "1", None).await.unwrap();
        store.set("/n/x", "2", None).await.unwrap();
        store.delete("/n/x").await.unwrap();

        let first = watcher.next().await.unwrap();
        assert_eq!(first.key, "/n/x");
        assert_eq!(first.kind(), crate::store::EventKind::Create);

        let second = watcher.next().await.unwrap();
        assert_eq!(second.kind(), crate::store::EventKind::Modify);
        assert_eq!(second.previous(), Some("1"));

        let third = watcher.next().await.unwrap();
        assert_eq!(third.kind(), crate::store::EventKind::Delete);
    }
}
