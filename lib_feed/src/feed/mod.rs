//! # Score Feed Module
//!
//! Turns the fragmented text frames of the real-time score socket into an
//! ordered sequence of typed events, one logical message at a time.
//!
//! ## Pipeline (per message)
//!
//! - **`transport`**: opens the socket and hands out frames sized to the
//!   free buffer space.
//! - **`frame_buffer`**: reassembles frames under a hard ceiling; an oversized
//!   message is abandoned with `MessageTooLong`.
//! - **`sniffer`**: reads the discriminator field without decoding the body.
//! - **`decoder`**: static dispatch from discriminator to payload type.
//!
//! ## Lifecycle
//!
//! - **`client`**: built once per address; enforces single-flight iteration.
//! - **`connection`**: connect, receive and teardown for one iteration.
//! - **`stream`**: the pull iterator tying everything together.
//!
//! Nothing here spawns a task or retries. Reconnection is left to the caller.

#![forbid(unsafe_code)]

/// Entry point: one client per feed address.
pub mod client;
/// Connection state machine and single-flight guard.
pub mod connection;
/// Discriminator → payload dispatch.
pub mod decoder;
/// Per-item, transport, usage and config errors.
pub mod errors;
/// Bounded reassembly of fragmented messages.
pub mod frame_buffer;
/// Typed event payloads.
pub mod payloads;
/// Minimal-parse discriminator extraction.
pub mod sniffer;
/// The pull iterator over feed events.
pub mod stream;
/// Socket abstraction and the frame-level WebSocket implementation.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::FeedClient;
pub use connection::ConnectionState;
pub use errors::{ConfigError, FeedError, FeedItem, TransportError, UsageError};
pub use payloads::{AcceptedPayload, EventKind, FeedEvent, RejectedPayload, ScoreCore, UploadPayload};
pub use stream::{FeedStream, StreamPhase};
pub use transport::{Connector, Frame, FrameKind, FrameSource, WsConnector};
