//! # Feed Error Taxonomy
//!
//! Every failure the feed can produce is a value, never a panic. The variants
//! fall into three groups:
//!
//! - **Connection-level** (`ConnectionError`, `ConnectionLost`): terminal. The
//!   stream emits one of these once and then ends.
//! - **Message-level** (`MessageTooLong`, `UnknownMessageType`,
//!   `DeserializationError`): scoped to a single logical message. The stream
//!   moves on to the next message afterwards.
//! - **Usage-level** (`UsageError`): a programmer error, returned synchronously
//!   when a second iteration is started on a busy client. It never travels
//!   through the stream.

use thiserror::Error;

use crate::feed::connection::ConnectionState;

/// A single item yielded by the feed: a decoded event or a structured error.
pub type FeedItem = Result<crate::feed::payloads::FeedEvent, FeedError>;

/// # Feed Error
///
/// The per-item error kinds surfaced to the consumer of a `FeedStream`.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The socket handshake against the target address failed.
    #[error("failed to connect to {url}: {source}")]
    ConnectionError {
        /// The address the client attempted to reach.
        url: String,
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// An open connection dropped without the caller asking for it.
    #[error("connection lost while {state}: {reason}")]
    ConnectionLost {
        /// The connection state observed when the failure happened.
        state: ConnectionState,
        /// A human readable description of the fault.
        reason: String,
    },

    /// A logical message grew past the receive buffer ceiling and was abandoned.
    #[error("message exceeded the {limit} byte receive buffer and was discarded")]
    MessageTooLong {
        /// The configured ceiling in bytes.
        limit: usize,
    },

    /// A well-formed message (or frame) of a type this client does not know.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    /// The message could not be decoded into the shape its type promised.
    #[error("could not deserialize message, expected {expected}: {raw}")]
    DeserializationError {
        /// The offending message text, kept for diagnostics.
        raw: String,
        /// What the decoder was looking for.
        expected: String,
    },
}

impl FeedError {
    /// Builds a `DeserializationError`, keeping the raw message for diagnostics.
    ///
    /// Text frames are UTF-8 on the wire; the lossy conversion only matters for
    /// transports that hand over unchecked bytes.
    pub fn deserialization(raw: &[u8], expected: impl Into<String>) -> Self {
        FeedError::DeserializationError {
            raw: String::from_utf8_lossy(raw).into_owned(),
            expected: expected.into(),
        }
    }

    /// Returns `true` for errors after which the stream always ends.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionError { .. } | FeedError::ConnectionLost { .. }
        )
    }

    /// Short, stable label for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::ConnectionError { .. } => "connection_error",
            FeedError::ConnectionLost { .. } => "connection_lost",
            FeedError::MessageTooLong { .. } => "message_too_long",
            FeedError::UnknownMessageType(_) => "unknown_message_type",
            FeedError::DeserializationError { .. } => "deserialization_error",
        }
    }
}

/// # Transport Error
///
/// Failures raised below the feed protocol: socket, TLS, handshake and URL
/// problems. They are wrapped into `FeedError::ConnectionError` or flattened
/// into `FeedError::ConnectionLost` by the connection lifecycle.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An error reported by the WebSocket implementation.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A socket read or write failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The TLS layer could not be set up.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The configured address could not be parsed.
    #[error("invalid feed address: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The address has no host usable for a socket or TLS session.
    #[error("invalid feed host: {0}")]
    InvalidHost(String),

    /// The server broke the WebSocket framing or handshake rules.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The handshake did not finish within the configured window.
    #[error("connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// The remote side sent a close frame.
    #[error("remote closed the connection: {0}")]
    RemoteClosed(String),

    /// The transport ended without a close frame.
    #[error("connection reset without closing handshake")]
    Reset,
}

/// # Usage Error
///
/// Raised synchronously, before any network action, when the client is used
/// in a way its contract forbids.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// Another iteration is still active on this client instance.
    #[error("feed client is already being consumed; only one iteration may be active at a time")]
    AlreadyActive,
}

/// # Config Error
///
/// Returned by `FeedConfig::validate` for settings the client cannot run with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The base address is not an absolute URL.
    #[error("invalid feed address `{url}`: {reason}")]
    InvalidUrl {
        /// The rejected value.
        url: String,
        /// Parser output.
        reason: String,
    },

    /// The base address does not use the `ws` or `wss` scheme.
    #[error("unsupported scheme `{0}`, expected ws or wss")]
    UnsupportedScheme(String),

    /// The receive buffer ceiling must hold at least one byte.
    #[error("max_message_bytes must be greater than zero")]
    ZeroCapacity,

    /// The discriminator field name is empty.
    #[error("discriminator_field must not be empty")]
    EmptyDiscriminator,
}
