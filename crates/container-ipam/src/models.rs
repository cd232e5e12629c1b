//! Records stored under the key schema

use crate::allocator::AddressRange;
use crate::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::warn;

/// Subnet configuration record, stored as JSON at `networks/<subnet>/config`
///
/// `Ipnet` and `Mask` are the original record. `RangeStart`/`RangeEnd` are
/// written alongside so the reconciler can detect leaked addresses; readers
/// that do not know them ignore them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// Network base address, also used as the subnet id
    #[serde(rename = "Ipnet")]
    pub network: Ipv4Addr,

    /// Prefix length
    #[serde(rename = "Mask", with = "mask_text")]
    pub prefix_len: u8,

    #[serde(rename = "RangeStart", default, skip_serializing_if = "Option::is_none")]
    pub range_start: Option<Ipv4Addr>,

    #[serde(rename = "RangeEnd", default, skip_serializing_if = "Option::is_none")]
    pub range_end: Option<Ipv4Addr>,
}

impl SubnetConfig {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            network,
            prefix_len,
            range_start: None,
            range_end: None,
        }
    }

    pub fn with_range(mut self, range: AddressRange) -> Self {
        self.range_start = Some(range.start());
        self.range_end = Some(range.end());
        self
    }

    /// Subnet identifier used in keys
    pub fn subnet_id(&self) -> String {
        self.network.to_string()
    }

    pub fn cidr(&self) -> Result<Ipv4Net> {
        Ok(Ipv4Net::new(self.network, self.prefix_len)?)
    }

    /// Range of addresses ever initialized into the pool, if recorded
    pub fn range(&self) -> Option<AddressRange> {
        match (self.range_start, self.range_end) {
            (Some(start), Some(end)) => AddressRange::new(start, end).ok(),
            _ => None,
        }
    }

    /// Render an address the way callers expect it, `ip/mask`
    pub fn format_address(&self, address: Ipv4Addr) -> String {
        format!("{}/{}", address, self.prefix_len)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

/// The mask is written as a string (`"24"`) but numbers are accepted too
mod mask_text {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(prefix_len: &u8, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&prefix_len.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Mask {
            Text(String),
            Number(u8),
        }

        let prefix_len = match Mask::deserialize(deserializer)? {
            Mask::Text(text) => text.trim().parse::<u8>().map_err(serde::de::Error::custom)?,
            Mask::Number(n) => n,
        };
        if prefix_len > 32 {
            return Err(serde::de::Error::custom(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }
        Ok(prefix_len)
    }
}

/// Static inbound/outbound cap. `0,0` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(rename = "IN", default)]
    pub inbound: u64,

    #[serde(rename = "OUT", default)]
    pub outbound: u64,
}

impl RateLimit {
    pub fn new(inbound: u64, outbound: u64) -> Self {
        Self { inbound, outbound }
    }

    pub fn is_unlimited(&self) -> bool {
        self.inbound == 0 && self.outbound == 0
    }

    /// Read `IN=`/`OUT=` entries from a container environment, case-insensitively.
    /// Missing or unparsable entries count as zero.
    pub fn from_env(env: &[String]) -> Self {
        let mut limit = Self::default();
        for entry in env {
            let Some((name, value)) = entry.split_once('=') else {
                continue;
            };
            let slot = match name.trim().to_ascii_uppercase().as_str() {
                "IN" => &mut limit.inbound,
                "OUT" => &mut limit.outbound,
                _ => continue,
            };
            match value.trim().parse::<u64>() {
                Ok(v) => *slot = v,
                Err(e) => warn!(entry = %entry, error = %e, "ignoring malformed rate limit"),
            }
        }
        limit
    }
}

/// Value stored at `assigned/<host>/<address>`
///
/// Older writers stored either nothing, a bare container id, or a bare
/// `{"IN":..,"OUT":..}` object; all three still parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentValue {
    #[serde(rename = "ContainerId", default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,

    #[serde(flatten)]
    pub limit: RateLimit,
}

impl AssignmentValue {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }
        if value.starts_with('{') {
            return serde_json::from_str(value)
                .map_err(|e| Error::Serialization(format!("bad assignment value {}: {}", value, e)));
        }
        Ok(Self {
            container_id: Some(value.to_string()),
            limit: RateLimit::default(),
        })
    }

    /// Encode for the store; an empty record is an empty value
    pub fn encode(&self) -> Result<String> {
        if self.container_id.is_none() && self.limit.is_unlimited() {
            return Ok(String::new());
        }
        Ok(serde_json::to_string(self)?)
    }
}

/// A successful allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub subnet: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl Allocation {
    pub fn cidr(&self) -> Result<Ipv4Net> {
        Ok(Ipv4Net::new(self.address, self.prefix_len)?)
    }
}

impl std::fmt::Display for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}
