//! Container IP Address Management
//!
//! Hands out IPv4 addresses to containers across many hosts that share one
//! etcd-like key-value store:
//! - Per-subnet pools of free addresses, moved to per-host assignment sets
//!   under an exclusive lease lock
//! - Container to address endpoint mappings
//! - Startup reconciliation against the live container set
//! - Watch-driven enforcement of per-container bandwidth limits
//!
//! The store is the only shared state. Every component takes its host name
//! and collaborators at construction.

pub mod allocator;
mod command;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod keys;
pub mod lock;
pub mod models;
pub mod reconciler;
pub mod runtime;
pub mod service;
pub mod shaper;
pub mod store;

// Re-export core types
pub use allocator::{AddressRange, InitializedRange, IpPool};
pub use config::IpamConfig;
pub use endpoint::EndpointStore;
pub use error::{Error, Result};
pub use events::{Decision, EventHandler, FlowControlPipeline, PipelineHandle};
pub use keys::KeySpace;
pub use lock::{LeaseLock, RetryPolicy};
pub use models::{Allocation, AssignmentValue, RateLimit, SubnetConfig};
pub use reconciler::{ReconcileReport, Reconciler};
pub use runtime::{ContainerDetails, ContainerRuntime, ContainerSummary, DockerCliRuntime, StaticRuntime};
pub use service::IpamService;
pub use shaper::{CommandRateLimiter, RateLimiter, RecordingRateLimiter};
pub use store::{EtcdStore, KvStore, MemoryStore, WatchEvent};
