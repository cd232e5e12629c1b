//! IPAM service
//!
//! Wires the store, pool, endpoint store, reconciler and flow-control
//! pipeline for one host from an [`IpamConfig`]. This is the surface a
//! socket-facing driver calls; it never exposes lock objects or raw keys.

use crate::allocator::{InitializedRange, IpPool};
use crate::config::IpamConfig;
use crate::endpoint::EndpointStore;
use crate::events::{EventHandler, FlowControlPipeline, PipelineHandle};
use crate::keys::KeySpace;
use crate::models::{Allocation, SubnetConfig};
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::runtime::{ContainerRuntime, DockerCliRuntime, FlowLimitResolver};
use crate::shaper::{CommandRateLimiter, RateLimiter};
use crate::store::{EtcdStore, KvStore};
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{error, info};

/// Address management for one host
pub struct IpamService {
    config: IpamConfig,
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    pool: IpPool,
    runtime: Arc<dyn ContainerRuntime>,
    limiter: Arc<dyn RateLimiter>,
}

impl IpamService {
    /// Build against etcd, the Docker CLI and the command rate limiter
    pub fn from_config(config: IpamConfig) -> Result<Self> {
        let config = config.resolve_hostname()?;
        config.validate()?;

        let store = EtcdStore::new(config.store.endpoints.clone(), config.store.request_timeout())?;
        let runtime = DockerCliRuntime::with_path(config.runtime.docker_path.clone());
        let limiter = CommandRateLimiter::new(config.shaper.clone(), config.pipeline.interface.clone());

        Self::with_components(config, Arc::new(store), Arc::new(runtime), Arc::new(limiter))
    }

    /// Build from explicit collaborators. `config.hostname` must be set.
    pub fn with_components(
        config: IpamConfig,
        store: Arc<dyn KvStore>,
        runtime: Arc<dyn ContainerRuntime>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Result<Self> {
        if config.hostname.is_empty() {
            return Err(Error::Config("hostname must be set".to_string()));
        }
        config.validate()?;

        let keys = KeySpace::new(config.store.key_root.clone());
        let resolver = FlowLimitResolver::new(runtime.clone(), config.allocation.settle_delay());
        let pool = IpPool::new(store.clone(), keys.clone(), config.hostname.clone(), &config.allocation)
            .with_flow_limits(resolver);

        info!(host = %config.hostname, root = %keys.root(), "IPAM service ready");
        Ok(Self {
            config,
            store,
            keys,
            pool,
            runtime,
            limiter,
        })
    }

    pub fn config(&self) -> &IpamConfig {
        &self.config
    }

    pub fn host(&self) -> &str {
        &self.config.hostname
    }

    pub fn pool(&self) -> &IpPool {
        &self.pool
    }

    pub fn endpoints(&self) -> &EndpointStore {
        self.pool.endpoints()
    }

    // ==================== Allocation ====================

    pub async fn allocate(&self, subnet: &str, requested: Option<Ipv4Addr>) -> Result<Allocation> {
        self.pool.allocate(subnet, requested).await
    }

    pub async fn release(&self, subnet: &str, address: Ipv4Addr) -> Result<()> {
        self.pool.release(subnet, address).await
    }

    pub async fn initialize_range(&self, start: Ipv4Addr, end: Ipv4Addr) -> Result<InitializedRange> {
        self.pool.initialize_range(start, end).await
    }

    pub async fn subnet_config(&self, subnet: &str) -> Result<SubnetConfig> {
        self.pool.subnet_config(subnet).await
    }

    pub async fn delete_subnet(&self, subnet: &str) -> Result<()> {
        self.pool.delete_subnet(subnet).await
    }

    // ==================== Endpoints ====================

    pub async fn save_endpoint(&self, container: &str, subnet: &str, address: Ipv4Addr) -> Result<()> {
        self.endpoints().save(container, subnet, address).await
    }

    pub async fn lookup_endpoint(&self, container: &str) -> Result<Ipv4Addr> {
        self.endpoints().lookup(container).await
    }

    pub async fn forget_endpoint(&self, container: &str) -> Result<()> {
        self.endpoints().forget(container).await
    }

    // ==================== Background work ====================

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.pool.clone(), self.runtime.clone())
            .repair_leaked(self.config.reconcile.repair_leaked)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler().run().await
    }

    pub fn flow_control(&self) -> FlowControlPipeline {
        let handler = EventHandler::new(self.host(), self.runtime.clone(), self.limiter.clone());
        FlowControlPipeline::new(self.store.clone(), self.keys.networks(), handler, &self.config.pipeline)
    }

    /// Reconcile once, then start the flow-control pipeline.
    /// A failed reconciliation is logged; the pipeline starts regardless.
    pub async fn start(&self) -> PipelineHandle {
        if let Err(e) = self.reconcile().await {
            error!(error = %e, "startup reconciliation failed");
        }
        self.flow_control().start().await
    }
}
