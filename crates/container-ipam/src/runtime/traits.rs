//! Container runtime trait definition
//!
//! The engine only needs two questions answered: which containers are
//! live (with their addresses) and, for one container, its init pid and
//! environment.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// A running container and the addresses bound to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    /// Full container id
    pub id: String,
    /// IPv4 addresses across all attached networks
    pub addresses: Vec<Ipv4Addr>,
}

impl ContainerSummary {
    pub fn has_address(&self, address: Ipv4Addr) -> bool {
        self.addresses.contains(&address)
    }
}

/// Details needed to enter a container's network namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerDetails {
    /// Pid of the container's init process
    pub pid: u32,
    /// `NAME=value` environment entries
    pub env: Vec<String>,
}

/// Container runtime trait
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Every running container
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Pid and environment of one container
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;
}
