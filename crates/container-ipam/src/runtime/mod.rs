//! Container runtime access
//!
//! Provides:
//! - The [`ContainerRuntime`] trait and a Docker CLI implementation
//! - [`StaticRuntime`], a fixed container table for tests
//! - Lookups from an address back to the container that holds it

mod traits;

pub mod docker;
pub mod fixed;

pub use docker::DockerCliRuntime;
pub use fixed::StaticRuntime;
pub use traits::{ContainerDetails, ContainerRuntime, ContainerSummary};

use crate::models::RateLimit;
use crate::Result;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// First running container bound to `address`
pub async fn find_owner(
    runtime: &dyn ContainerRuntime,
    address: Ipv4Addr,
) -> Result<Option<ContainerSummary>> {
    Ok(runtime
        .list_containers()
        .await?
        .into_iter()
        .find(|c| c.has_address(address)))
}

/// Every address bound to a running container
pub async fn live_addresses(runtime: &dyn ContainerRuntime) -> Result<HashSet<Ipv4Addr>> {
    Ok(runtime
        .list_containers()
        .await?
        .into_iter()
        .flat_map(|c| c.addresses)
        .collect())
}

/// Resolves a fresh allocation to its container's declared rate limit
#[derive(Clone)]
pub struct FlowLimitResolver {
    runtime: Arc<dyn ContainerRuntime>,
    settle_delay: Duration,
}

impl FlowLimitResolver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settle_delay: Duration) -> Self {
        Self {
            runtime,
            settle_delay,
        }
    }

    /// How long to wait for the runtime to attach the address
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// The `IN`/`OUT` limit of the container holding `address`, if any
    pub async fn resolve(&self, address: Ipv4Addr) -> Result<Option<RateLimit>> {
        let Some(owner) = find_owner(self.runtime.as_ref(), address).await? else {
            return Ok(None);
        };
        let details = self.runtime.inspect_container(&owner.id).await?;
        Ok(Some(RateLimit::from_env(&details.env)))
    }
}
