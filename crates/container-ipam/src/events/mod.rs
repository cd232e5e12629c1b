//! Event-driven flow control
//!
//! Watches the networks tree for changes to this host's assignments and
//! applies the rate limit recorded in each assignment value to the
//! container bound to that address.
//!
//! # Usage
//!
//! ```rust,ignore
//! use container_ipam::events::{EventHandler, FlowControlPipeline};
//!
//! let handler = EventHandler::new(host, runtime, limiter);
//! let pipeline = FlowControlPipeline::new(store, keys.networks(), handler, &settings);
//! let handle = pipeline.start().await;
//! ```

pub mod handler;
pub mod pipeline;

pub use handler::{Decision, EventHandler};
pub use pipeline::{FlowControlPipeline, PipelineHandle};
