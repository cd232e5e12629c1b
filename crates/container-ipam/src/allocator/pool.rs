//! Store-backed address pool
//!
//! Every address in an initialized range lives in exactly one namespace:
//! `pool/<ip>` while free, `assigned/<host>/<ip>` while held. Moves between
//! the two are ordered writes (delete first, insert second) performed under
//! the subnet's lease lock, so two hosts never hand out the same address.

use super::range::AddressRange;
use crate::config::AllocationSettings;
use crate::endpoint::EndpointStore;
use crate::keys::KeySpace;
use crate::lock::{LeaseLock, RetryPolicy};
use crate::models::{Allocation, AssignmentValue, SubnetConfig};
use crate::runtime::FlowLimitResolver;
use crate::store::{delete_if_present, KeyValue, KvStore};
use crate::{Error, Result};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Outcome of initializing a range into a subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializedRange {
    pub subnet: String,
    /// Addresses written to the pool by this call
    pub added: Vec<Ipv4Addr>,
    /// Addresses left alone because a host holds them
    pub skipped: Vec<Ipv4Addr>,
}

/// An address held by some host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostAssignment {
    pub host: String,
    pub address: Ipv4Addr,
}

/// Address pool and allocation engine for this host
#[derive(Clone)]
pub struct IpPool {
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    host: String,
    lease: Duration,
    retry: RetryPolicy,
    default_prefix_len: u8,
    endpoints: EndpointStore,
    flow_limits: Option<FlowLimitResolver>,
}

impl IpPool {
    pub fn new(
        store: Arc<dyn KvStore>,
        keys: KeySpace,
        host: impl Into<String>,
        settings: &AllocationSettings,
    ) -> Self {
        let host = host.into();
        let endpoints = EndpointStore::new(store.clone(), keys.clone(), host.clone());
        Self {
            store,
            keys,
            host,
            lease: settings.lock_lease(),
            retry: RetryPolicy::new(
                settings.lock_max_retries,
                Duration::from_millis(settings.lock_max_backoff_ms),
            ),
            default_prefix_len: settings.default_prefix_len,
            endpoints,
            flow_limits: None,
        }
    }

    /// Mirror each new allocation's declared rate limit into its assignment value
    pub fn with_flow_limits(mut self, resolver: FlowLimitResolver) -> Self {
        self.flow_limits = Some(resolver);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn endpoints(&self) -> &EndpointStore {
        &self.endpoints
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn lock_for(&self, subnet: &str) -> LeaseLock {
        LeaseLock::new(self.store.clone(), self.keys.lock(subnet), self.lease)
    }

    /// Run `critical` under the subnet lock, mapping exhausted retries to `PoolContended`
    async fn locked<F, Fut, T>(&self, subnet: &str, critical: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.lock_for(subnet)
            .with_lock(&self.retry, critical)
            .await
            .map_err(|e| match e {
                Error::AlreadyHeld(_) => Error::PoolContended {
                    subnet: subnet.to_string(),
                    attempts: self.retry.total_attempts(),
                },
                other => other,
            })
    }

    // ==================== Allocation ====================

    /// Allocate an address from a subnet.
    ///
    /// Without `requested`, takes the first free address in store order.
    pub async fn allocate(&self, subnet: &str, requested: Option<Ipv4Addr>) -> Result<Allocation> {
        let address = self
            .locked(subnet, || self.take_address(subnet, requested))
            .await?;
        info!(subnet = %subnet, address = %address, host = %self.host, "Allocated IP");

        let prefix_len = match self.subnet_config(subnet).await {
            Ok(config) => config.prefix_len,
            Err(e) => {
                warn!(subnet = %subnet, error = %e, "no subnet config, using default prefix");
                self.default_prefix_len
            }
        };

        if let Some(resolver) = &self.flow_limits {
            self.spawn_flow_limit_mirror(resolver.clone(), subnet, address);
        }

        Ok(Allocation {
            subnet: subnet.to_string(),
            address,
            prefix_len,
        })
    }

    /// Move one address from `pool` to `assigned/<host>`. Caller holds the lock.
    async fn take_address(&self, subnet: &str, requested: Option<Ipv4Addr>) -> Result<Ipv4Addr> {
        let free = self.store.get_children(&self.keys.pool(subnet)).await?;
        if free.is_empty() {
            return Err(Error::PoolExhausted(subnet.to_string()));
        }

        let address = match requested {
            Some(address) => address,
            None => parse_addresses(&free)
                .into_iter()
                .next()
                .ok_or_else(|| Error::PoolExhausted(subnet.to_string()))?,
        };

        let assigned_key = self.keys.assigned_entry(subnet, &self.host, address);
        if self.store.exists(&assigned_key).await? {
            return Err(Error::AlreadyAllocated(address));
        }

        match self.store.delete(&self.keys.pool_entry(subnet, address)).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::NotInPool {
                    address,
                    subnet: subnet.to_string(),
                })
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.store.set(&assigned_key, "", None).await {
            error!(subnet = %subnet, address = %address, error = %e, "failed to record assignment");
            // Put it back so the address is not lost from both namespaces
            if let Err(restore) = self.store.set(&self.keys.pool_entry(subnet, address), "", None).await {
                error!(subnet = %subnet, address = %address, error = %restore, "failed to restore pool entry");
            }
            return Err(e);
        }

        Ok(address)
    }

    fn spawn_flow_limit_mirror(&self, resolver: FlowLimitResolver, subnet: &str, address: Ipv4Addr) {
        let assignments = self.endpoints.assignments().clone();
        let key = self.keys.assigned_entry(subnet, &self.host, address);

        tokio::spawn(async move {
            tokio::time::sleep(resolver.settle_delay()).await;

            let limit = match resolver.resolve(address).await {
                Ok(Some(limit)) => limit,
                Ok(None) => {
                    debug!(address = %address, "no container bound to address yet");
                    return;
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "failed to resolve flow limit");
                    return;
                }
            };

            match assignments.update(&key, |value| value.limit = limit).await {
                Ok(true) => debug!(address = %address, ?limit, "flow limit recorded"),
                Ok(false) => debug!(address = %address, "address released before flow limit was recorded"),
                Err(e) => warn!(address = %address, error = %e, "failed to record flow limit"),
            }
        });
    }

    // ==================== Release ====================

    /// Return an address held by this host to the pool. Releasing an address
    /// this host does not hold is a no-op.
    ///
    /// The move from `assigned` back to `pool` runs under the subnet lock;
    /// forgetting the owner's endpoint happens before it and is best-effort.
    pub async fn release(&self, subnet: &str, address: Ipv4Addr) -> Result<()> {
        let assigned_key = self.keys.assigned_entry(subnet, &self.host, address);

        match self.store.get(&assigned_key).await {
            Ok(value) => self.forget_owner(&value).await,
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(address = %address, error = %e, "could not read assignment owner"),
        }

        let released = self
            .locked(subnet, || async {
                if !self.endpoints.assignments().remove(&assigned_key).await? {
                    return Ok(false);
                }
                self.store
                    .set(&self.keys.pool_entry(subnet, address), "", None)
                    .await?;
                Ok(true)
            })
            .await?;

        if released {
            info!(subnet = %subnet, address = %address, "Released IP");
        } else {
            info!(subnet = %subnet, address = %address, "Skip release, not assigned to this host");
        }
        Ok(())
    }

    async fn forget_owner(&self, value: &str) {
        let owner = match AssignmentValue::parse(value) {
            Ok(parsed) => parsed.container_id,
            Err(e) => {
                warn!(error = %e, "unreadable assignment value");
                None
            }
        };
        if let Some(container) = owner {
            if let Err(e) = self.endpoints.forget(&container).await {
                warn!(container = %container, error = %e, "failed to forget endpoint");
            }
        }
    }

    // ==================== Initialization ====================

    /// Populate a subnet's pool from an inclusive range using the default prefix length
    pub async fn initialize_range(&self, start: Ipv4Addr, end: Ipv4Addr) -> Result<InitializedRange> {
        self.initialize_range_with_prefix(AddressRange::new(start, end)?, self.default_prefix_len)
            .await
    }

    /// Populate a subnet's pool from an inclusive range.
    ///
    /// Addresses held by any host are skipped, so re-running with an
    /// overlapping range only adds what is not already tracked.
    pub async fn initialize_range_with_prefix(
        &self,
        range: AddressRange,
        prefix_len: u8,
    ) -> Result<InitializedRange> {
        let net = range.network(prefix_len)?;
        let subnet = net.network().to_string();

        let existing = match self.subnet_config(&subnet).await {
            Ok(config) => Some(config),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        if let Some(config) = &existing {
            if config.prefix_len != prefix_len {
                return Err(Error::InvalidArgument(format!(
                    "subnet {} already exists with prefix /{}",
                    subnet, config.prefix_len
                )));
            }
        }

        let result = self
            .locked(&subnet, || async {
                let held: HashSet<Ipv4Addr> = self
                    .all_assigned(&subnet)
                    .await?
                    .into_iter()
                    .map(|a| a.address)
                    .collect();

                let mut added = Vec::new();
                let mut skipped = Vec::new();
                for address in range.iter() {
                    if held.contains(&address) {
                        warn!(address = %address, "IP has been allocated");
                        skipped.push(address);
                        continue;
                    }
                    self.store
                        .set(&self.keys.pool_entry(&subnet, address), "", None)
                        .await?;
                    added.push(address);
                }

                let covered = existing
                    .as_ref()
                    .and_then(SubnetConfig::range)
                    .map_or(range, |known| known.hull(&range));
                let config = SubnetConfig::new(net.network(), prefix_len).with_range(covered);
                self.store
                    .set(&self.keys.config(&subnet), &config.to_json()?, None)
                    .await?;
                info!(subnet = %subnet, config = ?config, "Initialized config");

                Ok(InitializedRange {
                    subnet: subnet.clone(),
                    added,
                    skipped,
                })
            })
            .await?;

        info!(
            subnet = %result.subnet,
            added = result.added.len(),
            skipped = result.skipped.len(),
            "Initialized address range {}", range
        );
        Ok(result)
    }

    // ==================== Queries ====================

    pub async fn subnet_config(&self, subnet: &str) -> Result<SubnetConfig> {
        let value = self.store.get(&self.keys.config(subnet)).await?;
        SubnetConfig::from_json(&value)
    }

    /// Subnet ids under the networks root
    pub async fn list_subnets(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_children(&self.keys.networks())
            .await?
            .iter()
            .map(|kv| kv.name().to_string())
            .collect())
    }

    /// Free addresses, in store order
    pub async fn pool_addresses(&self, subnet: &str) -> Result<Vec<Ipv4Addr>> {
        let free = self.store.get_children(&self.keys.pool(subnet)).await?;
        Ok(parse_addresses(&free))
    }

    /// Addresses held by `host`
    pub async fn assigned_addresses(&self, subnet: &str, host: &str) -> Result<Vec<Ipv4Addr>> {
        let held = self.store.get_children(&self.keys.assigned(subnet, host)).await?;
        Ok(parse_addresses(&held))
    }

    /// Addresses held by every host
    pub async fn all_assigned(&self, subnet: &str) -> Result<Vec<HostAssignment>> {
        let hosts = self.store.get_children(&self.keys.assigned_root(subnet)).await?;
        let mut all = Vec::new();
        for host in hosts {
            for address in self.assigned_addresses(subnet, host.name()).await? {
                all.push(HostAssignment {
                    host: host.name().to_string(),
                    address,
                });
            }
        }
        Ok(all)
    }

    /// Remove a subnet and everything under it, its lock record included.
    /// Waits for the subnet lock so no allocation or release is mid-flight.
    pub async fn delete_subnet(&self, subnet: &str) -> Result<()> {
        let subnet_key = self.keys.subnet(subnet);
        let lock_key = self.keys.lock(subnet);

        let existed = self
            .locked(subnet, || async {
                let existed = self
                    .store
                    .get_children(&subnet_key)
                    .await?
                    .iter()
                    .any(|kv| kv.key != lock_key);
                delete_if_present(self.store.as_ref(), &subnet_key).await?;
                Ok(existed)
            })
            .await?;

        if existed {
            info!(subnet = %subnet, "Deleted network");
        } else {
            debug!(subnet = %subnet, "Skip delete, no such network");
        }
        Ok(())
    }

    /// Addresses in the subnet's recorded range that are neither free nor
    /// held by any host. With `repair`, they are returned to the pool.
    ///
    /// Runs under the subnet lock so no allocation is mid-flight.
    pub async fn find_leaked(&self, subnet: &str, repair: bool) -> Result<Vec<Ipv4Addr>> {
        let config = self.subnet_config(subnet).await?;
        let Some(range) = config.range() else {
            debug!(subnet = %subnet, "no recorded range, skipping leak check");
            return Ok(Vec::new());
        };

        self.locked(subnet, || async {
            let mut tracked: HashSet<Ipv4Addr> =
                self.pool_addresses(subnet).await?.into_iter().collect();
            tracked.extend(self.all_assigned(subnet).await?.into_iter().map(|a| a.address));

            let leaked: Vec<Ipv4Addr> = range.iter().filter(|ip| !tracked.contains(ip)).collect();
            for address in &leaked {
                if repair {
                    self.store
                        .set(&self.keys.pool_entry(subnet, *address), "", None)
                        .await?;
                    info!(subnet = %subnet, address = %address, "Returned leaked IP to pool");
                } else {
                    warn!(subnet = %subnet, address = %address, "IP is in neither pool nor assigned");
                }
            }
            Ok(leaked)
        })
        .await
    }
}

/// Parse trailing key segments as addresses, skipping anything malformed
fn parse_addresses(entries: &[KeyValue]) -> Vec<Ipv4Addr> {
    entries
        .iter()
        .filter_map(|kv| match kv.name().parse::<Ipv4Addr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(key = %kv.key, "ignoring malformed address key");
                None
            }
        })
        .collect()
}

/// Writer for this host's assignment values.
///
/// Only the owning host writes under `assigned/<host>`, so one in-process
/// mutex orders every read-modify-write and removal of those values. The
/// flow-limit mirror, endpoint saves and releases share one writer.
#[derive(Clone)]
pub(crate) struct AssignmentWriter {
    store: Arc<dyn KvStore>,
    guard: Arc<Mutex<()>>,
}

impl AssignmentWriter {
    pub(crate) fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Read-modify-write an assignment value. Returns `false` without writing
    /// if the assignment no longer exists.
    pub(crate) async fn update<F>(&self, key: &str, update: F) -> Result<bool>
    where
        F: FnOnce(&mut AssignmentValue),
    {
        let _held = self.guard.lock().await;
        let current = match self.store.get(key).await {
            Ok(value) => value,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut value = AssignmentValue::parse(&current).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "replacing unreadable assignment value");
            AssignmentValue::default()
        });
        update(&mut value);
        self.store.set(key, &value.encode()?, None).await?;
        Ok(true)
    }

    /// Delete an assignment. Returns whether it existed.
    pub(crate) async fn remove(&self, key: &str) -> Result<bool> {
        let _held = self.guard.lock().await;
        delete_if_present(self.store.as_ref(), key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RateLimit;
    use crate::runtime::{ContainerDetails, ContainerRuntime, StaticRuntime};
    use crate::store::MemoryStore;

    const HOST: &str = "node-1";

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn test_pool(store: &Arc<MemoryStore>) -> IpPool {
        IpPool::new(
            store.clone(),
            KeySpace::new("/skylark"),
            HOST,
            &AllocationSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_initialize_writes_pool_and_config() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);

        let init = pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();
        assert_eq!(init.subnet, "10.0.2.0");
        assert_eq!(init.added.len(), 3);

        assert_eq!(
            pool.pool_addresses("10.0.2.0").await.unwrap(),
            vec![ip("10.0.2.1"), ip("10.0.2.2"), ip("10.0.2.3")]
        );
        let config = pool.subnet_config("10.0.2.0").await.unwrap();
        assert_eq!(config.prefix_len, 24);
        assert_eq!(config.network, ip("10.0.2.0"));

        // Lock was released
        assert!(!store.exists("/skylark/networks/10.0.2.0/wait").await.unwrap());
    }

    #[tokio::test]
    async fn test_take_first_and_move_namespaces() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        let allocation = pool.allocate("10.0.2.0", None).await.unwrap();
        assert_eq!(allocation.address, ip("10.0.2.1"));
        assert_eq!(allocation.to_string(), "10.0.2.1/24");

        assert!(!pool.pool_addresses("10.0.2.0").await.unwrap().contains(&ip("10.0.2.1")));
        assert_eq!(
            pool.assigned_addresses("10.0.2.0", HOST).await.unwrap(),
            vec![ip("10.0.2.1")]
        );
    }

    #[tokio::test]
    async fn test_requested_address() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        let allocation = pool.allocate("10.0.2.0", Some(ip("10.0.2.3"))).await.unwrap();
        assert_eq!(allocation.address, ip("10.0.2.3"));

        let again = pool.allocate("10.0.2.0", Some(ip("10.0.2.3"))).await;
        assert!(matches!(again, Err(Error::AlreadyAllocated(a)) if a == ip("10.0.2.3")));

        let outside = pool.allocate("10.0.2.0", Some(ip("10.0.2.99"))).await;
        assert!(matches!(outside, Err(Error::NotInPool { .. })));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.1")).await.unwrap();

        pool.allocate("10.0.2.0", None).await.unwrap();
        let result = pool.allocate("10.0.2.0", None).await;
        assert!(matches!(result, Err(Error::PoolExhausted(_))));

        let unknown = pool.allocate("10.9.9.0", None).await;
        assert!(matches!(unknown, Err(Error::PoolExhausted(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_lock() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        // Someone else holds the pool lock for far longer than the retry budget
        store
            .create_if_absent("/skylark/networks/10.0.2.0/wait", "other", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let result = pool.allocate("10.0.2.0", None).await;
        assert!(matches!(result, Err(Error::PoolContended { attempts: 31, .. })));
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_release_unknown_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();

        pool.release("10.0.2.0", ip("10.0.2.1")).await.unwrap();
        // Still exactly one pool entry, no assignment created
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 2);
        assert!(pool.assigned_addresses("10.0.2.0", HOST).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_forgets_endpoint() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();

        let allocation = pool.allocate("10.0.2.0", None).await.unwrap();
        pool.endpoints()
            .save("infra-1", "10.0.2.0", allocation.address)
            .await
            .unwrap();
        assert_eq!(pool.endpoints().lookup("infra-1").await.unwrap(), allocation.address);

        pool.release("10.0.2.0", allocation.address).await.unwrap();
        assert!(pool.endpoints().lookup("infra-1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_reinitialize_skips_held() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();
        pool.allocate("10.0.2.0", None).await.unwrap();

        // Another host holds .2
        let other = IpPool::new(
            store.clone(),
            KeySpace::new("/skylark"),
            "node-2",
            &AllocationSettings::default(),
        );
        other.allocate("10.0.2.0", None).await.unwrap();

        let init = pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.5")).await.unwrap();
        assert_eq!(init.skipped, vec![ip("10.0.2.1"), ip("10.0.2.2")]);
        assert_eq!(init.added.len(), 3);

        let config = pool.subnet_config("10.0.2.0").await.unwrap();
        assert_eq!(config.range().unwrap().end(), ip("10.0.2.5"));
    }

    #[tokio::test]
    async fn test_prefix_mismatch_rejected() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        let range = AddressRange::new(ip("10.0.2.1"), ip("10.0.2.3")).unwrap();
        let result = pool.initialize_range_with_prefix(range, 25).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_find_and_repair_leaked() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        // Simulate a crash between the pool delete and the assigned insert
        store.delete("/skylark/networks/10.0.2.0/pool/10.0.2.2").await.unwrap();

        let leaked = pool.find_leaked("10.0.2.0", false).await.unwrap();
        assert_eq!(leaked, vec![ip("10.0.2.2")]);
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 2);

        pool.find_leaked("10.0.2.0", true).await.unwrap();
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 3);
        assert!(pool.find_leaked("10.0.2.0", false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_subnet() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        pool.delete_subnet("10.0.2.0").await.unwrap();
        assert!(pool.list_subnets().await.unwrap().is_empty());
        pool.delete_subnet("10.0.2.0").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_limit_mirrored_after_settle() {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(StaticRuntime::new());
        runtime.add_container(
            "c1",
            vec![ip("10.0.2.1")],
            ContainerDetails {
                pid: 4242,
                env: vec!["IN=100".to_string(), "OUT=50".to_string()],
            },
        );

        let resolver = FlowLimitResolver::new(
            runtime.clone() as Arc<dyn ContainerRuntime>,
            Duration::from_secs(1),
        );
        let pool = test_pool(&store).with_flow_limits(resolver);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();
        pool.allocate("10.0.2.0", None).await.unwrap();

        let key = "/skylark/networks/10.0.2.0/assigned/node-1/10.0.2.1";
        assert_eq!(store.get(key).await.unwrap(), "");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let value = AssignmentValue::parse(&store.get(key).await.unwrap()).unwrap();
        assert_eq!(value.limit, RateLimit::new(100, 50));
    }

    #[tokio::test]
    async fn test_assignment_writer_missing_key() {
        let store = Arc::new(MemoryStore::new());
        let writer = AssignmentWriter::new(store.clone());
        let updated = writer
            .update("/nope", |v| v.limit = RateLimit::new(1, 1))
            .await
            .unwrap();
        assert!(!updated);
        assert!(!writer.remove("/nope").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_subnet_waits_for_lock() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.3")).await.unwrap();

        store
            .create_if_absent("/skylark/networks/10.0.2.0/wait", "other", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let result = pool.delete_subnet("10.0.2.0").await;
        assert!(matches!(result, Err(Error::PoolContended { .. })));
        assert_eq!(pool.pool_addresses("10.0.2.0").await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_waits_for_lock() {
        let store = Arc::new(MemoryStore::new());
        let pool = test_pool(&store);
        pool.initialize_range(ip("10.0.2.1"), ip("10.0.2.2")).await.unwrap();
        let allocation = pool.allocate("10.0.2.0", None).await.unwrap();

        store
            .create_if_absent("/skylark/networks/10.0.2.0/wait", "other", Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        let result = pool.release("10.0.2.0", allocation.address).await;
        assert!(matches!(result, Err(Error::PoolContended { .. })));
        assert_eq!(
            pool.assigned_addresses("10.0.2.0", HOST).await.unwrap(),
            vec![allocation.address]
        );
    }
}
