//! Command-line rate limiter
//!
//! Finds the host side of a container's veth pair and shapes it with
//! `wondershaper`:
//!
//! 1. `nsenter -t <pid> -n ip link show eth0` gives `N: eth0@ifM: ...`
//! 2. `ip link show` on the host, the line starting `M:` names the peer
//! 3. `wondershaper <peer> <OUT> <IN>` (the host peer sees traffic reversed)
//! 4. `tc qdisc show dev <peer>` is logged for inspection

use super::traits::RateLimiter;
use crate::command::exec_command;
use crate::config::ShaperSettings;
use crate::models::RateLimit;
use crate::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

/// Rate limiter that shells out to `nsenter`, `ip`, `wondershaper` and `tc`
pub struct CommandRateLimiter {
    settings: ShaperSettings,
    /// Interface name inside the container
    interface: String,
}

impl CommandRateLimiter {
    pub fn new(settings: ShaperSettings, interface: impl Into<String>) -> Self {
        Self {
            settings,
            interface: interface.into(),
        }
    }

    /// Host-side peer device of the container's interface
    async fn host_device(&self, pid: u32) -> Result<String> {
        let pid = pid.to_string();
        let inner = exec_command(
            &self.settings.nsenter_path,
            &["-t", &pid, "-n", &self.settings.ip_path, "link", "show", &self.interface],
            Error::RateLimit,
        )
        .await?;
        let peer_index = parse_peer_index(&inner, &self.interface)?;

        let host = exec_command(&self.settings.ip_path, &["link", "show"], Error::RateLimit).await?;
        parse_host_device(&host, peer_index)
    }
}

#[async_trait]
impl RateLimiter for CommandRateLimiter {
    #[instrument(skip(self))]
    async fn apply(&self, pid: u32, limit: RateLimit) -> Result<()> {
        let device = self.host_device(pid).await?;
        let outbound = limit.outbound.to_string();
        let inbound = limit.inbound.to_string();

        exec_command(
            &self.settings.wondershaper_path,
            &[&device, &outbound, &inbound],
            Error::RateLimit,
        )
        .await?;
        info!(pid, device = %device, inbound = limit.inbound, outbound = limit.outbound, "Applied flow limit");

        match exec_command(&self.settings.tc_path, &["qdisc", "show", "dev", &device], Error::RateLimit).await {
            Ok(qdisc) => debug!(device = %device, qdisc = %qdisc.trim(), "tc qdisc"),
            Err(e) => warn!(device = %device, error = %e, "failed to read back qdisc"),
        }
        Ok(())
    }
}

/// Peer ifindex from `ip link show <iface>` run inside the container,
/// e.g. `37256: eth0@if37257: <...>` gives 37257
pub fn parse_peer_index(output: &str, interface: &str) -> Result<u32> {
    let marker = format!("{}@if", interface);
    output
        .lines()
        .find_map(|line| {
            let (_, rest) = line.split_once(&marker)?;
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .ok_or_else(|| {
            Error::RateLimit(format!("no veth peer for {} in {:?}", interface, output.trim()))
        })
}

/// Device name for `index` from host `ip link show` output,
/// e.g. `37257: veth5f1c@if37256: <...>` gives `veth5f1c`
pub fn parse_host_device(output: &str, index: u32) -> Result<String> {
    output
        .lines()
        .find_map(|line| {
            let (idx, rest) = line.split_once(':')?;
            if idx.trim().parse::<u32>().ok()? != index {
                return None;
            }
            let name = rest.trim_start().split(|c| c == '@' || c == ':').next()?.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .ok_or_else(|| Error::RateLimit(format!("no host interface with index {}", index)))
}
