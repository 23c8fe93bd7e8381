//! Worker process support: configuration, engine wiring, the background
//! render dispatcher, and terminal feedback.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod terminal;

pub use config::{ConfigError, WorkerConfig};
pub use dispatcher::Dispatcher;
