//! Key-value store contract
//!
//! The allocation engine only depends on this trait, so it runs unchanged
//! against etcd or the in-memory store used in tests.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A key and its value as returned by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key path
    pub key: String,
    /// Value, empty for directories and bare presence markers
    pub value: String,
}

impl KeyValue {
    /// Trailing path segment of the key
    pub fn name(&self) -> &str {
        crate::keys::last_segment(&self.key)
    }
}

/// Classification of a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Modify,
    Delete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Create => write!(f, "create"),
            EventKind::Modify => write!(f, "modify"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single change observed under a watched prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// Value after the change (`None` or empty on delete)
    pub value: Option<String>,
    /// Value before the change, if the key existed
    pub prev_value: Option<String>,
}

impl WatchEvent {
    pub fn new(key: impl Into<String>, value: Option<String>, prev_value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
            prev_value,
        }
    }

    /// Value after the change with empty strings treated as absent
    pub fn current(&self) -> Option<&str> {
        self.value.as_deref().filter(|v| !v.is_empty())
    }

    /// Value before the change with empty strings treated as absent
    pub fn previous(&self) -> Option<&str> {
        self.prev_value.as_deref().filter(|v| !v.is_empty())
    }

    /// Create when there was no previous value, modify when both exist,
    /// delete when only the previous value exists
    pub fn kind(&self) -> EventKind {
        match (self.current(), self.previous()) {
            (Some(_), Some(_)) => EventKind::Modify,
            (None, Some(_)) => EventKind::Delete,
            _ => EventKind::Create,
        }
    }
}

/// Blocking stream of change events under one prefix
#[async_trait]
pub trait Watcher: Send {
    /// Wait for the next event. Errors are transient; callers re-subscribe.
    async fn next(&mut self) -> Result<WatchEvent>;
}

/// Key-value store contract
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single key. Fails with `NotFound` when absent.
    async fn get(&self, key: &str) -> Result<String>;

    /// List the immediate children of a directory, sorted by key.
    /// An absent or empty directory yields an empty list.
    async fn get_children(&self, dir: &str) -> Result<Vec<KeyValue>>;

    /// Write a key unconditionally, optionally with a TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key and everything under it. Fails with `NotFound` when absent.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Create a key only if it does not exist. Fails with `AlreadyExists` otherwise.
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Subscribe to changes under a prefix, recursively
    async fn watch(&self, prefix: &str) -> Result<Box<dyn Watcher>>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
