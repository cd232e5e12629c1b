//! Error types for address management

use std::net::Ipv4Addr;
use thiserror::Error;

/// Result type for IPAM operations
pub type Result<T> = std::result::Result<T, Error>;

/// IPAM errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    // Lock errors
    #[error("Lock {0} is already held")]
    AlreadyHeld(String),

    #[error("Pool for subnet {subnet} is contended, gave up after {attempts} attempts")]
    PoolContended { subnet: String, attempts: u32 },

    // Allocation errors
    #[error("No free addresses left in subnet {0}")]
    PoolExhausted(String),

    #[error("IP {0} is already allocated")]
    AlreadyAllocated(Ipv4Addr),

    #[error("IP {address} is not free in subnet {subnet}")]
    NotInPool { address: Ipv4Addr, subnet: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    // Payload errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Collaborator errors
    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Rate limit enforcement failed: {0}")]
    RateLimit(String),

    // General errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this is a missing-key error; delete and release paths treat it as success
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Whether an exclusive create lost against an existing key
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists(_))
    }
}

impl From<ipnet::PrefixLenError> for Error {
    fn from(e: ipnet::PrefixLenError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::InvalidAddress(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}
