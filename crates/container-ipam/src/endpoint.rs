//! Container to address mapping
//!
//! `pods/<container>` holds the container's address. The assignment value
//! for that address also records the container id, so a release can find
//! and drop the mapping without a reverse index.

use crate::allocator::AssignmentWriter;
use crate::keys::KeySpace;
use crate::store::{delete_if_present, KvStore};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct EndpointStore {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    host: String,
    assignments: AssignmentWriter,
}

impl EndpointStore {
    pub fn new(store: Arc<dyn KvStore>, keys: KeySpace, host: impl Into<String>) -> Self {
        Self {
            assignments: AssignmentWriter::new(store.clone()),
            store,
            keys,
            host: host.into(),
        }
    }

    /// Shared writer for this host's assignment values
    pub(crate) fn assignments(&self) -> &AssignmentWriter {
        &self.assignments
    }

    /// Bind a container to an address this host holds in `subnet`
    pub async fn save(&self, container: &str, subnet: &str, address: Ipv4Addr) -> Result<()> {
        if container.is_empty() {
            return Err(Error::InvalidArgument("container id must not be empty".to_string()));
        }

        let assigned = self.keys.assigned_entry(subnet, &self.host, address);
        let owner = container.to_string();
        match self
            .assignments
            .update(&assigned, |value| value.container_id = Some(owner))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(address = %address, container = %container, "address is not assigned to this host"),
            Err(e) => warn!(address = %address, error = %e, "failed to record owner on assignment"),
        }

        self.store
            .set(&self.keys.pod(container), &address.to_string(), None)
            .await?;
        info!(container = %container, address = %address, "Saved endpoint");
        Ok(())
    }

    /// Address bound to a container. Fails with `NotFound` on a miss.
    pub async fn lookup(&self, container: &str) -> Result<Ipv4Addr> {
        let value = self.store.get(&self.keys.pod(container)).await?;
        value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("pod {} maps to {:?}", container, value)))
    }

    /// Drop a container's mapping; a missing mapping counts as success
    pub async fn forget(&self, container: &str) -> Result<()> {
        if delete_if_present(self.store.as_ref(), &self.keys.pod(container)).await? {
            debug!(container = %container, "Forgot endpoint");
        }
        Ok(())
    }
}
