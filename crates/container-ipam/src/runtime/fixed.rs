//! Fixed container runtime for tests and dry runs

use super::traits::{ContainerDetails, ContainerRuntime, ContainerSummary};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
struct FixedContainer {
    addresses: Vec<Ipv4Addr>,
    details: ContainerDetails,
}

/// Runtime backed by an in-memory container table
#[derive(Default)]
pub struct StaticRuntime {
    containers: Mutex<BTreeMap<String, FixedContainer>>,
    unavailable: Mutex<bool>,
}

impl StaticRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_container(&self, id: &str, addresses: Vec<Ipv4Addr>, details: ContainerDetails) {
        self.containers
            .lock()
            .insert(id.to_string(), FixedContainer { addresses, details });
    }

    pub fn remove_container(&self, id: &str) {
        self.containers.lock().remove(id);
    }

    /// Make every call fail as if the daemon were down
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock() = unavailable;
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.lock() {
            return Err(Error::Runtime("runtime unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for StaticRuntime {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        self.check_available()?;
        Ok(self
            .containers
            .lock()
            .iter()
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                addresses: c.addresses.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        self.check_available()?;
        self.containers
            .lock()
            .get(id)
            .map(|c| c.details.clone())
            .ok_or_else(|| Error::Runtime(format!("No such container: {}", id)))
    }
}
