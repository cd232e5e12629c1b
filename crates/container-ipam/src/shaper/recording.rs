//! Rate limiter that records calls instead of shaping anything

use super::traits::RateLimiter;
use crate::models::RateLimit;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One recorded `apply` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedLimit {
    pub pid: u32,
    pub limit: RateLimit,
}

#[derive(Default)]
pub struct RecordingRateLimiter {
    calls: Mutex<Vec<AppliedLimit>>,
    failing: Mutex<bool>,
    notify: Notify,
}

impl RecordingRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail after recording them
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn calls(&self) -> Vec<AppliedLimit> {
        self.calls.lock().clone()
    }

    /// Wait until at least `count` calls have been recorded
    pub async fn wait_for(&self, count: usize) -> Vec<AppliedLimit> {
        loop {
            {
                let calls = self.calls.lock();
                if calls.len() >= count {
                    return calls.clone();
                }
            }
            self.notify.notified().await;
        }
    }
}

#[async_trait]
impl RateLimiter for RecordingRateLimiter {
    async fn apply(&self, pid: u32, limit: RateLimit) -> Result<()> {
        self.calls.lock().push(AppliedLimit { pid, limit });
        self.notify.notify_one();
        if *self.failing.lock() {
            return Err(Error::RateLimit("recording limiter set to fail".to_string()));
        }
        Ok(())
    }
}
