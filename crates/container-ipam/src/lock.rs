//! Exclusive lease lock
//!
//! Mutual exclusion over a named key built from create-if-absent plus a TTL.
//! The store is the only authority: holding a `LeaseLock` value grants nothing
//! until `lock()` has succeeded, and the lease expires on its own if the
//! holder dies without releasing. There is no renewal.
//!
//! ```text
//!   unlocked ──create_if_absent(name, ttl)──► locked
//!      ▲                                        │
//!      └────────── delete(name) / ttl ──────────┘
//! ```

use crate::store::{delete_if_present, KvStore};
use crate::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded retry with uniform jitter for contended locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first failed one
    pub max_retries: u32,
    /// Exclusive upper bound of each random sleep
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            max_backoff,
        }
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Random sleep in `[0, max_backoff)`
    pub fn backoff(&self) -> Duration {
        let max_ms = self.max_backoff.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }

    /// Total attempts including the first
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    /// 30 retries, up to 900ms apart (about 27s worst case)
    fn default() -> Self {
        Self::new(30, Duration::from_millis(900))
    }
}

/// Lease-based lock on a single store key
#[derive(Clone)]
pub struct LeaseLock {
    store: Arc<dyn KvStore>,
    name: String,
    lease: Duration,
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("name", &self.name)
            .field("lease", &self.lease)
            .finish()
    }
}

impl LeaseLock {
    pub fn new(store: Arc<dyn KvStore>, name: impl Into<String>, lease: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            lease,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Try once. Fails with `AlreadyHeld` if another holder's lease is live.
    pub async fn lock(&self) -> Result<()> {
        match self
            .store
            .create_if_absent(&self.name, &self.name, Some(self.lease))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => Err(Error::AlreadyHeld(self.name.clone())),
            Err(e) => Err(e),
        }
    }

    /// Release the lock. An already-absent lock counts as released.
    pub async fn release(&self) -> Result<()> {
        if !delete_if_present(self.store.as_ref(), &self.name).await? {
            debug!(lock = %self.name, "lock already released");
        }
        Ok(())
    }

    /// Lock, retrying while held by someone else.
    /// Fails with `AlreadyHeld` once the policy is exhausted.
    pub async fn acquire(&self, policy: &RetryPolicy) -> Result<()> {
        match self.lock().await {
            Err(Error::AlreadyHeld(_)) => {}
            other => return other,
        }

        for attempt in 1..=policy.max_retries {
            tokio::time::sleep(policy.backoff()).await;
            debug!(lock = %self.name, attempt, "locked by others, retrying");

            match self.lock().await {
                Err(Error::AlreadyHeld(_)) => continue,
                other => return other,
            }
        }

        debug!(lock = %self.name, "abort, lock still held");
        Err(Error::AlreadyHeld(self.name.clone()))
    }

    /// Run `critical` while holding the lock, releasing it unconditionally afterwards
    pub async fn with_lock<F, Fut, T>(&self, policy: &RetryPolicy, critical: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire(policy).await?;
        let result = critical().await;
        if let Err(e) = self.release().await {
            // The lease still expires on its own
            warn!(lock = %self.name, error = %e, "failed to release lock");
        }
        result
    }
}
