//! In-memory transport used by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::feed::errors::TransportError;
use crate::feed::transport::{Connector, Frame, FrameKind, FrameSource};

pub(crate) fn text(payload: &str, end_of_message: bool) -> Frame {
    Frame {
        kind: FrameKind::Text,
        payload: Bytes::copy_from_slice(payload.as_bytes()),
        end_of_message,
    }
}

pub(crate) fn binary(payload: &[u8]) -> Frame {
    Frame {
        kind: FrameKind::Binary,
        payload: Bytes::copy_from_slice(payload),
        end_of_message: true,
    }
}

/// Observations shared between a test and the source it handed out.
#[derive(Debug, Default)]
struct SourceRecord {
    close_calls: AtomicUsize,
    dropped: AtomicBool,
    budgets: Mutex<Vec<usize>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SourceTracker(Arc<SourceRecord>);

impl SourceTracker {
    pub(crate) fn close_calls(&self) -> usize {
        self.0.close_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn is_dropped(&self) -> bool {
        self.0.dropped.load(Ordering::SeqCst)
    }

    /// The `max_len` of every receive call, in order.
    pub(crate) fn budgets(&self) -> Vec<usize> {
        self.0.budgets.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

/// Replays a fixed script, then stays silent like an idle socket.
pub(crate) struct ScriptedSource {
    script: VecDeque<Result<Frame, TransportError>>,
    hang_on_close: bool,
    tracker: SourceTracker,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<Result<Frame, TransportError>>) -> Self {
        Self {
            script: script.into(),
            hang_on_close: false,
            tracker: SourceTracker::default(),
        }
    }

    pub(crate) fn hang_on_close(mut self) -> Self {
        self.hang_on_close = true;
        self
    }

    pub(crate) fn tracker(&self) -> SourceTracker {
        self.tracker.clone()
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.tracker.0.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn receive(&mut self, max_len: usize) -> Result<Frame, TransportError> {
        if let Ok(mut budgets) = self.tracker.0.budgets.lock() {
            budgets.push(max_len);
        }
        match self.script.pop_front() {
            Some(step) => step,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tracker.0.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

enum Handshake {
    Accept(ScriptedSource),
    Refuse,
    Hang,
}

/// Hands out one prepared handshake outcome per `connect` call.
pub(crate) struct ScriptedConnector {
    handshakes: Mutex<VecDeque<Handshake>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn from_handshakes(handshakes: Vec<Handshake>) -> Self {
        Self {
            handshakes: Mutex::new(handshakes.into()),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn with_source(source: ScriptedSource) -> Self {
        Self::from_handshakes(vec![Handshake::Accept(source)])
    }

    pub(crate) fn with_sources(sources: Vec<ScriptedSource>) -> Self {
        Self::from_handshakes(sources.into_iter().map(Handshake::Accept).collect())
    }

    pub(crate) fn failing() -> Self {
        Self::from_handshakes(vec![Handshake::Refuse])
    }

    pub(crate) fn hanging() -> Self {
        Self::from_handshakes(vec![Handshake::Hang])
    }

    /// Shared counter of `connect` calls.
    pub(crate) fn connects(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connects)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Source = ScriptedSource;

    async fn connect(&self, _url: &Url) -> Result<ScriptedSource, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.handshakes.lock().ok().and_then(|mut h| h.pop_front());
        match next {
            Some(Handshake::Accept(source)) => Ok(source),
            Some(Handshake::Hang) => std::future::pending().await,
            Some(Handshake::Refuse) | None => Err(TransportError::Reset),
        }
    }
}
