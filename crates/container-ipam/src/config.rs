//! Daemon configuration
//!
//! Loaded from a TOML file. Every field has a default so a partial file
//! (or no file at all) yields a working single-endpoint configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpamConfig {
    /// Name this host registers assignments under. Resolved from the OS when empty.
    #[serde(default)]
    pub hostname: String,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub allocation: AllocationSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub shaper: ShaperSettings,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            store: StoreSettings::default(),
            allocation: AllocationSettings::default(),
            pipeline: PipelineSettings::default(),
            reconcile: ReconcileSettings::default(),
            runtime: RuntimeSettings::default(),
            shaper: ShaperSettings::default(),
        }
    }
}

/// Key-value store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// etcd client URLs, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Namespace every key lives under
    #[serde(default = "default_key_root")]
    pub key_root: String,

    /// Per-request timeout in milliseconds (not applied to watches)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_key_root() -> String {
    "/skylark".to_string()
}
fn default_request_timeout() -> u64 {
    1000
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            key_root: default_key_root(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl StoreSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Pool locking and allocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSettings {
    /// Lease on the per-subnet pool lock, in seconds
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,

    /// Lock attempts after the first one fails
    #[serde(default = "default_lock_retries")]
    pub lock_max_retries: u32,

    /// Upper bound (exclusive) of the random sleep between lock attempts
    #[serde(default = "default_lock_backoff")]
    pub lock_max_backoff_ms: u64,

    /// Delay before resolving a fresh allocation back to its container
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// Prefix length recorded for ranges initialized without an explicit one
    #[serde(default = "default_prefix_len")]
    pub default_prefix_len: u8,
}

fn default_lock_lease() -> u64 {
    20
}
fn default_lock_retries() -> u32 {
    30
}
fn default_lock_backoff() -> u64 {
    900
}
fn default_settle_delay() -> u64 {
    1000
}
fn default_prefix_len() -> u8 {
    24
}

impl Default for AllocationSettings {
    fn default() -> Self {
        Self {
            lock_lease_secs: default_lock_lease(),
            lock_max_retries: default_lock_retries(),
            lock_max_backoff_ms: default_lock_backoff(),
            settle_delay_ms: default_settle_delay(),
            default_prefix_len: default_prefix_len(),
        }
    }
}

impl AllocationSettings {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Event pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Capacity of the queue between the watch receiver and the handler
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Sleep before re-subscribing after a watch error
    #[serde(default = "default_watch_retry")]
    pub watch_retry_delay_ms: u64,

    /// Interface name inside the container namespace
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_queue_capacity() -> usize {
    64
}
fn default_watch_retry() -> u64 {
    1000
}
fn default_interface() -> String {
    "eth0".to_string()
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            watch_retry_delay_ms: default_watch_retry(),
            interface: default_interface(),
        }
    }
}

impl PipelineSettings {
    pub fn watch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.watch_retry_delay_ms)
    }
}

/// Startup reconciliation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Return addresses missing from both pool and assignments to the pool
    #[serde(default)]
    pub repair_leaked: bool,
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_docker_path")]
    pub docker_path: String,
}

fn default_docker_path() -> String {
    "docker".to_string()
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_path: default_docker_path(),
        }
    }
}

/// Rate-limit tool paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaperSettings {
    #[serde(default = "default_nsenter_path")]
    pub nsenter_path: String,

    #[serde(default = "default_ip_path")]
    pub ip_path: String,

    #[serde(default = "default_wondershaper_path")]
    pub wondershaper_path: String,

    #[serde(default = "default_tc_path")]
    pub tc_path: String,
}

fn default_nsenter_path() -> String {
    "nsenter".to_string()
}
fn default_ip_path() -> String {
    "ip".to_string()
}
fn default_wondershaper_path() -> String {
    "/sbin/wondershaper".to_string()
}
fn default_tc_path() -> String {
    "/sbin/tc".to_string()
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self {
            nsenter_path: default_nsenter_path(),
            ip_path: default_ip_path(),
            wondershaper_path: default_wondershaper_path(),
            tc_path: default_tc_path(),
        }
    }
}

impl IpamConfig {
    /// Default configuration file location
    pub const DEFAULT_PATH: &'static str = "/etc/ipamd/config.toml";

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = Path::new(Self::DEFAULT_PATH);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Fill in the hostname from the OS if none was configured
    pub fn resolve_hostname(mut self) -> Result<Self> {
        if self.hostname.is_empty() {
            self.hostname = hostname::get()
                .map_err(|e| Error::Config(format!("Could not retrieve hostname: {}", e)))?
                .to_string_lossy()
                .to_string();
        }
        Ok(self)
    }

    /// Check values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.store.endpoints.is_empty() {
            return Err(Error::Config("store.endpoints must not be empty".to_string()));
        }
        if !self.store.key_root.starts_with('/') {
            return Err(Error::Config(format!(
                "store.key_root must be absolute, got {}",
                self.store.key_root
            )));
        }
        if self.allocation.lock_lease_secs == 0 {
            return Err(Error::Config("allocation.lock_lease_secs must be positive".to_string()));
        }
        if self.allocation.default_prefix_len > 32 {
            return Err(Error::Config(format!(
                "allocation.default_prefix_len {} exceeds 32",
                self.allocation.default_prefix_len
            )));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(Error::Config("pipeline.queue_capacity must be positive".to_string()));
        }
        Ok(())
    }
}

/// Example configuration file content
pub fn example_config() -> &'static str {
    r#"# ipamd configuration
# Location: /etc/ipamd/config.toml

# hostname = "node-1"

[store]
endpoints = ["http://127.0.0.1:2379"]
key_root = "/skylark"
request_timeout_ms = 1000

[allocation]
lock_lease_secs = 20
lock_max_retries = 30
lock_max_backoff_ms = 900
settle_delay_ms = 1000
default_prefix_len = 24

[pipeline]
queue_capacity = 64
watch_retry_delay_ms = 1000
interface = "eth0"

[reconcile]
repair_leaked = false

[runtime]
docker_path = "docker"

[shaper]
nsenter_path = "nsenter"
ip_path = "ip"
wondershaper_path = "/sbin/wondershaper"
tc_path = "/sbin/tc"
"#
}
