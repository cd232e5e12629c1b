//! Traffic shaping
//!
//! Provides:
//! - The [`RateLimiter`] trait
//! - [`CommandRateLimiter`], which shapes the host side of a veth pair
//! - [`RecordingRateLimiter`], which only records calls

mod traits;

pub mod command;
pub mod recording;

pub use command::CommandRateLimiter;
pub use recording::{AppliedLimit, RecordingRateLimiter};
pub use traits::RateLimiter;
