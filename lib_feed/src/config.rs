//! # Feed Configuration
//!
//! Settings for one `FeedClient`. Every field has a production default, so an
//! empty JSON object (or `FeedConfig::default()`) targets the public feed.
//!
//! ```json
//! {
//!   "baseUrl": "wss://sockets.api.beatleader.xyz/",
//!   "path": "general",
//!   "discriminatorField": "message",
//!   "maxMessageBytes": 5242880,
//!   "connectTimeoutMs": 10000,
//!   "closeTimeoutMs": 2000,
//!   "unknownTypePolicy": "continue"
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::feed::errors::ConfigError;
use crate::feed::frame_buffer::DEFAULT_MAX_MESSAGE_BYTES;
use crate::feed::sniffer::DEFAULT_DISCRIMINATOR_FIELD;

pub const DEFAULT_BASE_URL: &str = "wss://sockets.api.beatleader.xyz/";
pub const DEFAULT_PATH: &str = "general";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;

/// What the stream does after yielding `UnknownMessageType` for a well-formed
/// message with an unrecognised discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownTypePolicy {
    /// Keep reading; the error is informational.
    #[default]
    Continue,
    /// End the stream after the error item.
    Terminate,
}

impl FromStr for UnknownTypePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" => Ok(UnknownTypePolicy::Continue),
            "terminate" => Ok(UnknownTypePolicy::Terminate),
            other => Err(format!("unknown policy `{other}`, expected continue or terminate")),
        }
    }
}

impl fmt::Display for UnknownTypePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownTypePolicy::Continue => f.write_str("continue"),
            UnknownTypePolicy::Terminate => f.write_str("terminate"),
        }
    }
}

/// # Feed Config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedConfig {
    /// `ws://` or `wss://` address of the socket host.
    pub base_url: String,
    /// Relative path appended to `base_url`.
    pub path: String,
    /// Envelope key holding the message type.
    pub discriminator_field: String,
    /// Ceiling for one reassembled message.
    pub max_message_bytes: usize,
    pub connect_timeout_ms: u64,
    /// Upper bound for the cooperative close handshake.
    pub close_timeout_ms: u64,
    pub unknown_type_policy: UnknownTypePolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            path: DEFAULT_PATH.to_string(),
            discriminator_field: DEFAULT_DISCRIMINATOR_FIELD.to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            unknown_type_policy: UnknownTypePolicy::default(),
        }
    }
}

impl FeedConfig {
    /// Config pointed at another host, everything else default.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Rejects settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.discriminator_field.is_empty() {
            return Err(ConfigError::EmptyDiscriminator);
        }
        self.target_url().map(|_| ())
    }

    /// `base_url` joined with `path`, with exactly one `/` between them.
    pub fn target_url(&self) -> Result<Url, ConfigError> {
        let mut base = Url::parse(&self.base_url).map_err(|err| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            reason: err.to_string(),
        })?;

        if !matches!(base.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(base.scheme().to_string()));
        }

        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }

        base.join(self.path.trim_start_matches('/'))
            .map_err(|err| ConfigError::InvalidUrl {
                url: format!("{}{}", base, self.path),
                reason: err.to_string(),
            })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}
