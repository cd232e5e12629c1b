//! Rate limiter trait definition

use crate::models::RateLimit;
use crate::Result;
use async_trait::async_trait;

/// Applies a static inbound/outbound cap to a container's network interface
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Shape the interface of the container whose init process is `pid`
    async fn apply(&self, pid: u32, limit: RateLimit) -> Result<()>;
}
