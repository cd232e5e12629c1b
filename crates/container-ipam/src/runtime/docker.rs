//! Docker CLI runtime
//!
//! Uses `docker ps` and `docker inspect`. Works against any daemon the
//! CLI is configured for.

use super::traits::{ContainerDetails, ContainerRuntime, ContainerSummary};
use crate::command::exec_command;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, instrument};

/// Subset of `docker inspect` output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Inspect {
    id: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    pid: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(default)]
    networks: Option<HashMap<String, InspectEndpoint>>,
}

#[derive(Debug, Default, Deserialize)]
struct InspectEndpoint {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

impl Inspect {
    fn addresses(&self) -> Vec<Ipv4Addr> {
        let mut addresses: Vec<Ipv4Addr> = Vec::new();
        let networks = self.network_settings.networks.iter().flat_map(|n| n.values());
        let candidates = std::iter::once(self.network_settings.ip_address.as_str())
            .chain(networks.map(|endpoint| endpoint.ip_address.as_str()));

        for text in candidates {
            if let Ok(ip) = text.parse::<Ipv4Addr>() {
                if !addresses.contains(&ip) {
                    addresses.push(ip);
                }
            }
        }
        addresses
    }
}

fn parse_inspect(output: &str) -> Result<Vec<Inspect>> {
    serde_json::from_str(output)
        .map_err(|e| Error::Runtime(format!("Unexpected docker inspect output: {}", e)))
}

/// Docker runtime driven through the `docker` binary
pub struct DockerCliRuntime {
    docker_path: String,
}

impl DockerCliRuntime {
    pub fn new() -> Self {
        Self::with_path("docker")
    }

    pub fn with_path(docker_path: impl Into<String>) -> Self {
        Self {
            docker_path: docker_path.into(),
        }
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    #[instrument(skip(self))]
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let ids = exec_command(&self.docker_path, &["ps", "-q", "--no-trunc"], Error::Runtime).await?;
        let ids: Vec<&str> = ids.lines().map(str::trim).filter(|id| !id.is_empty()).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut args = vec!["inspect"];
        args.extend(ids.iter().copied());
        let output = exec_command(&self.docker_path, &args, Error::Runtime).await?;

        let containers: Vec<ContainerSummary> = parse_inspect(&output)?
            .into_iter()
            .map(|inspect| ContainerSummary {
                addresses: inspect.addresses(),
                id: inspect.id,
            })
            .collect();
        debug!(count = containers.len(), "Listed containers");
        Ok(containers)
    }

    #[instrument(skip(self))]
    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let output = exec_command(&self.docker_path, &["inspect", id], Error::Runtime).await?;
        let inspect = parse_inspect(&output)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Runtime(format!("No such container: {}", id)))?;

        Ok(ContainerDetails {
            pid: inspect.state.pid,
            env: inspect.config.env.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSPECT: &str = r#"[
        {
            "Id": "3f2a9c",
            "State": {"Running": true, "Pid": 31337},
            "Config": {"Env": ["PATH=/usr/bin", "IN=100", "out=20"]},
            "NetworkSettings": {
                "IPAddress": "",
                "Networks": {
                    "skylark": {"IPAddress": "10.0.2.5"},
                    "bridge": {"IPAddress": "172.17.0.3"}
                }
            }
        },
        {
            "Id": "77bd01",
            "State": {"Pid": 0},
            "Config": {"Env": null},
            "NetworkSettings": {"IPAddress": "172.17.0.9", "Networks": null}
        }
    ]"#;

    #[test]
    fn test_parse_inspect_addresses() {
        let parsed = parse_inspect(INSPECT).unwrap();
        assert_eq!(parsed.len(), 2);

        let mut first = parsed[0].addresses();
        first.sort();
        assert_eq!(
            first,
            vec!["10.0.2.5".parse::<Ipv4Addr>().unwrap(), "172.17.0.3".parse().unwrap()]
        );
        assert_eq!(parsed[1].addresses(), vec!["172.17.0.9".parse::<Ipv4Addr>().unwrap()]);
    }

    #[test]
    fn test_parse_inspect_details() {
        let parsed = parse_inspect(INSPECT).unwrap();
        assert_eq!(parsed[0].state.pid, 31337);
        assert_eq!(parsed[0].config.env.as_ref().unwrap().len(), 3);
        assert!(parsed[1].config.env.is_none());
    }

    #[test]
    fn test_parse_inspect_garbage() {
        assert!(matches!(parse_inspect("not json"), Err(Error::Runtime(_))));
    }
}
