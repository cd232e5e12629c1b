//! Turns assignment watch events into rate-limit enforcement

use crate::keys::{assignment_host, last_segment};
use crate::models::{AssignmentValue, RateLimit};
use crate::runtime::{find_owner, ContainerRuntime};
use crate::shaper::RateLimiter;
use crate::store::WatchEvent;
use crate::Result;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the handler did with one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Not an assignment of this host
    Ignored,
    /// Trailing segment is not an address, or the value did not decode
    Malformed,
    /// `IN` and `OUT` both zero, or the assignment was removed
    Unlimited,
    /// No running container is bound to the address yet
    NoContainer(Ipv4Addr),
    /// Enforcement was started in the background
    Dispatched {
        address: Ipv4Addr,
        pid: u32,
        limit: RateLimit,
    },
}

/// Event handler for one host
#[derive(Clone)]
pub struct EventHandler {
    host: String,
    runtime: Arc<dyn ContainerRuntime>,
    limiter: Arc<dyn RateLimiter>,
}

impl EventHandler {
    pub fn new(
        host: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            host: host.into(),
            runtime,
            limiter,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether `event` concerns this host's assignments
    pub fn is_relevant(&self, event: &WatchEvent) -> bool {
        assignment_host(&event.key) == Some(self.host.as_str())
    }

    /// Decode an event and, if it carries a limit for a live container,
    /// start enforcement without waiting for it.
    pub async fn handle(&self, event: &WatchEvent) -> Result<Decision> {
        if !self.is_relevant(event) {
            return Ok(Decision::Ignored);
        }
        debug!(key = %event.key, kind = %event.kind(), "Handling assignment event");

        let segment = last_segment(&event.key);
        let address: Ipv4Addr = match segment.parse() {
            Ok(address) => address,
            Err(_) => {
                warn!(key = %event.key, "Invalid IP address in key, dropping event");
                return Ok(Decision::Malformed);
            }
        };

        let limit = match event.current().map(AssignmentValue::parse).transpose() {
            Ok(value) => value.map(|v| v.limit).unwrap_or_default(),
            Err(e) => {
                warn!(key = %event.key, error = %e, "Undecodable assignment value, dropping event");
                return Ok(Decision::Malformed);
            }
        };
        if limit.is_unlimited() {
            return Ok(Decision::Unlimited);
        }

        let Some(owner) = find_owner(self.runtime.as_ref(), address).await? else {
            debug!(address = %address, "no live container for address");
            return Ok(Decision::NoContainer(address));
        };
        let pid = self.runtime.inspect_container(&owner.id).await?.pid;

        let limiter = self.limiter.clone();
        tokio::spawn(async move {
            if let Err(e) = limiter.apply(pid, limit).await {
                warn!(address = %address, pid, error = %e, "failed to apply flow limit");
            }
        });
        info!(address = %address, container = %owner.id, pid, ?limit, "Dispatched flow limit");

        Ok(Decision::Dispatched {
            address,
            pid,
            limit,
        })
    }
}
