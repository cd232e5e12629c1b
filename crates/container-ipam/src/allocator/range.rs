//! Inclusive IPv4 address ranges

use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Inclusive range `start..=end` (stored as u32 for ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    start: u32,
    end: u32,
}

impl AddressRange {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        let (start, end) = (u32::from(start), u32::from(end));
        if start > end {
            return Err(Error::InvalidArgument(format!(
                "range start {} is after end {}",
                Ipv4Addr::from(start),
                Ipv4Addr::from(end)
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    pub fn end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= self.start && ip <= self.end
    }

    /// Smallest range covering both
    pub fn hull(&self, other: &AddressRange) -> AddressRange {
        AddressRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Ipv4Addr> {
        (self.start..=self.end).map(Ipv4Addr::from)
    }

    /// Network containing the whole range at the given prefix length.
    /// Fails if the range straddles two networks.
    pub fn network(&self, prefix_len: u8) -> Result<Ipv4Net> {
        let net = Ipv4Net::new(self.start(), prefix_len)?.trunc();
        if !net.contains(&self.end()) {
            return Err(Error::InvalidArgument(format!(
                "range {}-{} does not fit in {}",
                self.start(),
                self.end(),
                net
            )));
        }
        Ok(net)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start(), self.end())
    }
}
