//! Storyreel event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PipelineEvent`]: the event envelope for job transitions, scene
//!   outcomes, and production run results.
//! - [`EventLogger`]: background subscriber that writes every event to the
//!   tracing log.

pub mod bus;
pub mod logger;

pub use bus::{EventBus, PipelineEvent};
pub use logger::EventLogger;
