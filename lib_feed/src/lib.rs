//! # lib_feed
//!
//! Bounded, single-flight client for the real-time score-event WebSocket feed.
//!
//! The feed client is always compiled. The console/file logger lives behind
//! the `loggers` feature so that library consumers who bring their own `log`
//! backend do not pull in `fern` and friends.

// Declare the modules to re-export
pub mod config;
pub mod feed;

#[cfg(feature = "loggers")]
pub mod loggers;

// Re-export the public surface
pub use config::{FeedConfig, UnknownTypePolicy};
pub use feed::*;
