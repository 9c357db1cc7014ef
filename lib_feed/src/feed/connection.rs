//! # Connection Lifecycle
//!
//! Owns the socket of one feed iteration from handshake to teardown.
//!
//! ## Key Responsibilities
//! - **Single-flight**: a `SingleFlightGuard` is taken from the client's
//!   atomic flag before any socket call and released only when the lifecycle
//!   finishes (or is dropped).
//! - **Fault mapping**: handshake failures become `ConnectionError`, faults on
//!   an open socket become `ConnectionLost`. Cancellation of the caller's token
//!   is reported as `Step::Cancelled`, never as an error.
//! - **Teardown**: `end()` runs the cooperative close handshake under a short
//!   timeout and swallows its failures; `dispose()` drops the socket at once.
//!   Both are idempotent and safe when nothing was ever opened.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::feed::errors::{FeedError, TransportError, UsageError};
use crate::feed::transport::{Connector, Frame, FrameSource};

/// States of the one connection a client iteration owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Outcome of a cancellable lifecycle step.
#[derive(Debug)]
pub enum Step<T> {
    Ready(T),
    /// The caller's token fired. Not an error.
    Cancelled,
    Failed(FeedError),
}

/// Holds the client's single-flight flag for as long as it lives.
#[derive(Debug)]
pub struct SingleFlightGuard {
    flag: Arc<AtomicBool>,
}

impl SingleFlightGuard {
    /// Claims `flag`, or fails without side effects if it is already claimed.
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, UsageError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UsageError::AlreadyActive)?;
        Ok(Self {
            flag: Arc::clone(flag),
        })
    }
}

impl Drop for SingleFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// # Connection Lifecycle
///
/// One connect → receive* → end sequence against the feed address.
pub struct ConnectionLifecycle<C: Connector> {
    connector: Arc<C>,
    url: Url,
    state: ConnectionState,
    source: Option<C::Source>,
    guard: Option<SingleFlightGuard>,
    connect_timeout: Duration,
    close_timeout: Duration,
}

impl<C: Connector> ConnectionLifecycle<C> {
    /// Creates an idle lifecycle that owns `guard` until it is torn down.
    pub fn new(
        connector: Arc<C>,
        url: Url,
        guard: SingleFlightGuard,
        connect_timeout: Duration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            url,
            state: ConnectionState::Idle,
            source: None,
            guard: Some(guard),
            connect_timeout,
            close_timeout,
        }
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The address this lifecycle connects to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether this lifecycle still holds the client's single-flight flag.
    pub fn holds_guard(&self) -> bool {
        self.guard.is_some()
    }

    /// Performs the handshake. `Idle → Connecting → Open` on success.
    pub async fn begin(&mut self, cancel: &CancellationToken) -> Step<()> {
        debug_assert_eq!(self.state, ConnectionState::Idle, "begin() runs once per lifecycle");
        self.state = ConnectionState::Connecting;
        log::info!("Connecting to score feed at {}", self.url);

        let attempt = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.url));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Connect to {} cancelled by caller", self.url);
                return Step::Cancelled;
            }
            outcome = attempt => outcome,
        };

        let source = match outcome {
            Ok(Ok(source)) => source,
            Ok(Err(err)) => return Step::Failed(self.connect_failed(err)),
            Err(_) => {
                let err = TransportError::ConnectTimeout(self.connect_timeout.as_millis() as u64);
                return Step::Failed(self.connect_failed(err));
            }
        };

        self.source = Some(source);
        self.state = ConnectionState::Open;
        log::info!("Score feed connection open: {}", self.url);
        Step::Ready(())
    }

    fn connect_failed(&self, source: TransportError) -> FeedError {
        log::error!("Failed to connect to {}: {}", self.url, source);
        FeedError::ConnectionError {
            url: self.url.to_string(),
            source,
        }
    }

    /// Waits for the next frame of at most `max_len` bytes.
    pub async fn receive(&mut self, max_len: usize, cancel: &CancellationToken) -> Step<Frame> {
        let state = self.state;
        let Some(source) = self.source.as_mut() else {
            return Step::Failed(FeedError::ConnectionLost {
                state,
                reason: "no open connection".to_string(),
            });
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            received = source.receive(max_len) => match received {
                Ok(frame) => Step::Ready(frame),
                Err(err) => {
                    log::error!("Score feed connection lost while {}: {}", state, err);
                    Step::Failed(FeedError::ConnectionLost {
                        state,
                        reason: err.to_string(),
                    })
                }
            },
        }
    }

    /// Cooperative close, bounded by the close timeout. Never fails.
    pub async fn end(&mut self) {
        if let Some(mut source) = self.source.take() {
            self.state = ConnectionState::Closing;
            match tokio::time::timeout(self.close_timeout, source.close()).await {
                Ok(Ok(())) => log::info!("Score feed connection closed: {}", self.url),
                Ok(Err(err)) => log::debug!("Ignoring close handshake failure: {}", err),
                Err(_) => log::debug!(
                    "Close handshake did not finish within {:?}, dropping the socket",
                    self.close_timeout
                ),
            }
        }
        self.finish();
    }

    /// Drops the socket without a close handshake.
    pub fn dispose(&mut self) {
        if self.source.take().is_some() {
            log::debug!("Score feed socket disposed without close handshake");
        }
        self.finish();
    }

    fn finish(&mut self) {
        self.state = ConnectionState::Closed;
        self.guard = None;
    }
}
