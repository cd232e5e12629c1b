//! Startup reconciliation
//!
//! Releases addresses this host holds that no running container is bound
//! to, then checks each subnet for addresses lost from both namespaces.
//! Safe to run repeatedly.

use crate::allocator::IpPool;
use crate::runtime::{live_addresses, ContainerRuntime};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An address in a subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubnetAddress {
    pub subnet: String,
    pub address: Ipv4Addr,
}

/// What one reconciliation pass did
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub subnets: usize,
    /// Stale assignments returned to the pool
    pub released: Vec<SubnetAddress>,
    /// Addresses found in neither pool nor any assignment
    pub leaked: Vec<SubnetAddress>,
    /// Per-subnet or per-address failures that were logged and skipped
    pub failures: usize,
}

pub struct Reconciler {
    pool: IpPool,
    runtime: Arc<dyn ContainerRuntime>,
    repair_leaked: bool,
}

impl Reconciler {
    pub fn new(pool: IpPool, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            pool,
            runtime,
            repair_leaked: false,
        }
    }

    /// Return leaked addresses to the pool instead of only reporting them
    pub fn repair_leaked(mut self, repair: bool) -> Self {
        self.repair_leaked = repair;
        self
    }

    /// Run one pass.
    ///
    /// Fails only if the live container set or the subnet list cannot be
    /// read; releasing against an unknown live set would free addresses in use.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let started_at = Utc::now();
        let live = live_addresses(self.runtime.as_ref()).await?;
        let subnets = self.pool.list_subnets().await?;
        debug!(live = live.len(), subnets = subnets.len(), "Reconciling");

        let mut report = ReconcileReport {
            started_at,
            finished_at: started_at,
            subnets: subnets.len(),
            released: Vec::new(),
            leaked: Vec::new(),
            failures: 0,
        };

        for subnet in &subnets {
            let assigned = match self.pool.assigned_addresses(subnet, self.pool.host()).await {
                Ok(assigned) => assigned,
                Err(e) => {
                    error!(subnet = %subnet, error = %e, "failed to list assigned addresses");
                    report.failures += 1;
                    continue;
                }
            };

            for address in assigned.into_iter().filter(|ip| !live.contains(ip)) {
                match self.pool.release(subnet, address).await {
                    Ok(()) => {
                        info!(subnet = %subnet, address = %address, "Released IP with no live container");
                        report.released.push(SubnetAddress {
                            subnet: subnet.clone(),
                            address,
                        });
                    }
                    Err(e) => {
                        error!(subnet = %subnet, address = %address, error = %e, "failed to release stale IP");
                        report.failures += 1;
                    }
                }
            }

            match self.pool.find_leaked(subnet, self.repair_leaked).await {
                Ok(leaked) => report.leaked.extend(leaked.into_iter().map(|address| SubnetAddress {
                    subnet: subnet.clone(),
                    address,
                })),
                Err(e) if e.is_not_found() => debug!(subnet = %subnet, "no config, skipping leak check"),
                Err(e) => {
                    warn!(subnet = %subnet, error = %e, "leak check failed");
                    report.failures += 1;
                }
            }
        }

        report.finished_at = Utc::now();
        info!(
            subnets = report.subnets,
            released = report.released.len(),
            leaked = report.leaked.len(),
            failures = report.failures,
            "Reconciliation finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationSettings;
    use crate::keys::KeySpace;
    use crate::runtime::{ContainerDetails, StaticRuntime};
    use crate::store::{KvStore, MemoryStore};

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, IpPool, Arc<StaticRuntime>) {
        let store = Arc::new(MemoryStore::new());
        let pool = IpPool::new(
            store.clone(),
            KeySpace::new("/skylark"),
            "node-1",
            &AllocationSettings::default(),
        );
        (store, pool, Arc::new(StaticRuntime::new()))
    }

    #[tokio::test]
    async fn test_runtime_failure_releases_nothing() {
        let (_store, pool, runtime) = setup();
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();
        pool.allocate("10.0.2.0", None).await.unwrap();
        runtime.set_unavailable(true);

        let reconciler = Reconciler::new(pool.clone(), runtime);
        assert!(reconciler.run().await.is_err());
        assert_eq!(pool.assigned_addresses("10.0.2.0", "node-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_other_hosts_untouched() {
        let (store, pool, runtime) = setup();
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();
        store
            .delete("/skylark/networks/10.0.2.0/pool/10.0.2.3")
            .await
            .unwrap();
        store
            .set("/skylark/networks/10.0.2.0/assigned/node-2/10.0.2.3", "", None)
            .await
            .unwrap();

        let report = Reconciler::new(pool.clone(), runtime).run().await.unwrap();
        assert!(report.released.is_empty());
        assert!(report.leaked.is_empty());
        assert_eq!(
            pool.assigned_addresses("10.0.2.0", "node-2").await.unwrap(),
            vec![ip("10.0.2.3")]
        );
    }

    #[tokio::test]
    async fn test_leak_reported_then_repaired() {
        let (store, pool, runtime) = setup();
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();
        store
            .delete("/skylark/networks/10.0.2.0/pool/10.0.2.2")
            .await
            .unwrap();

        let report = Reconciler::new(pool.clone(), runtime.clone()).run().await.unwrap();
        assert_eq!(report.leaked.len(), 1);
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap(), vec![ip("10.0.2.1")]);

        let report = Reconciler::new(pool.clone(), runtime)
            .repair_leaked(true)
            .run()
            .await
            .unwrap();
        assert_eq!(report.leaked[0].address, ip("10.0.2.2"));
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_live_container_keeps_address() {
        let (_store, pool, runtime) = setup();
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();
        let allocation = pool.allocate("10.0.2.0", None).await.unwrap();
        runtime.add_container("c1", vec![allocation.address], ContainerDetails::default());

        let reconciler = Reconciler::new(pool.clone(), runtime);
        let first = reconciler.run().await.unwrap();
        let second = reconciler.run().await.unwrap();
        assert!(first.released.is_empty());
        assert!(second.released.is_empty());
        assert_eq!(first.subnets, 1);
    }
}
