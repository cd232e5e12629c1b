//! Address allocation
//!
//! Provides:
//! - Inclusive address ranges and their containing network
//! - The store-backed pool that moves addresses between free and assigned

mod pool;
mod range;

pub use pool::{HostAssignment, InitializedRange, IpPool};
pub(crate) use pool::AssignmentWriter;
pub use range::AddressRange;
