//! # Feed Client
//!
//! Entry point of the library. A client is built once for a target address and
//! hands out one `FeedStream` at a time; each stream owns exactly one socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::FeedConfig;
use crate::feed::connection::{ConnectionLifecycle, SingleFlightGuard};
use crate::feed::errors::{ConfigError, UsageError};
use crate::feed::stream::FeedStream;
use crate::feed::transport::{Connector, WsConnector};

/// # Feed Client
///
/// Reusable across sequential iterations, never concurrent ones.
///
/// ```no_run
/// use lib_feed::{FeedClient, FeedConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> anyhow::Result<()> {
/// let client = FeedClient::new(FeedConfig::default())?;
/// let mut feed = client.events(CancellationToken::new())?;
/// while let Some(item) = feed.next().await {
///     match item {
///         Ok(event) => println!("{} by {}", event.kind(), event.player_id()),
///         Err(err) => eprintln!("{err}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct FeedClient<C: Connector = WsConnector> {
    config: FeedConfig,
    url: Url,
    connector: Arc<C>,
    active: Arc<AtomicBool>,
}

impl FeedClient<WsConnector> {
    /// Creates a client using the frame-level WebSocket transport.
    pub fn new(config: FeedConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config, WsConnector::new())
    }
}

impl<C: Connector> FeedClient<C> {
    /// Creates a client over a custom transport.
    pub fn with_connector(config: FeedConfig, connector: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let url = config.target_url()?;
        Ok(Self {
            config,
            url,
            connector: Arc::new(connector),
            active: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The resolved feed address.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Whether a `FeedStream` from this client is still alive.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Starts an iteration. Nothing touches the network until the first
    /// `next()`; a second call while a stream is alive fails right here.
    ///
    /// Cancelling `cancel` ends the stream without an error item.
    pub fn events(&self, cancel: CancellationToken) -> Result<FeedStream<C>, UsageError> {
        let guard = SingleFlightGuard::acquire(&self.active)?;
        let connection = ConnectionLifecycle::new(
            Arc::clone(&self.connector),
            self.url.clone(),
            guard,
            self.config.connect_timeout(),
            self.config.close_timeout(),
        );
        Ok(FeedStream::new(connection, &self.config, cancel))
    }
}
