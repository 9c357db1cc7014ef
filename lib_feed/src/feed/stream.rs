//! # Feed Stream
//!
//! The pull-based iterator handed out by `FeedClient::events`. Each call to
//! `next()` receives frames until one logical message is complete, then sniffs
//! and decodes it into exactly one `FeedItem`.
//!
//! ## Ending
//! - caller cancellation: `None`, no error item
//! - `ConnectionError` / `ConnectionLost`: emitted once, then `None`
//! - a non-text data frame: `UnknownMessageType("<kind> frame")`, then `None`
//! - `UnknownMessageType` under `UnknownTypePolicy::Terminate`
//!
//! Every ending runs the connection teardown. Dropping the stream instead
//! releases the socket without a close handshake.

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::config::{FeedConfig, UnknownTypePolicy};
use crate::feed::connection::{ConnectionLifecycle, ConnectionState, Step};
use crate::feed::decoder::PayloadDecoder;
use crate::feed::errors::{FeedError, FeedItem};
use crate::feed::frame_buffer::FrameBuffer;
use crate::feed::sniffer::MessageTypeSniffer;
use crate::feed::transport::{Connector, FrameKind};

/// Where the stream is in its receive/dispatch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    NotStarted,
    Connected,
    Receiving,
    Dispatching,
    Ended,
}

/// # Feed Stream
///
/// One iteration over the feed. Holds the client's single-flight guard until
/// it ends or is dropped.
pub struct FeedStream<C: Connector> {
    connection: ConnectionLifecycle<C>,
    buffer: FrameBuffer,
    sniffer: MessageTypeSniffer,
    decoder: PayloadDecoder,
    unknown_type_policy: UnknownTypePolicy,
    cancel: CancellationToken,
    phase: StreamPhase,
}

impl<C: Connector> FeedStream<C> {
    pub(crate) fn new(
        connection: ConnectionLifecycle<C>,
        config: &FeedConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection,
            buffer: FrameBuffer::new(config.max_message_bytes),
            sniffer: MessageTypeSniffer::new(config.discriminator_field.clone()),
            decoder: PayloadDecoder,
            unknown_type_policy: config.unknown_type_policy,
            cancel,
            phase: StreamPhase::NotStarted,
        }
    }

    /// Where the stream is in its per-message cycle.
    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    /// State of the underlying connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Whether `next` will only ever return `None` from now on.
    pub fn is_ended(&self) -> bool {
        self.phase == StreamPhase::Ended
    }

    /// Pulls the next event or error. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<FeedItem> {
        match self.phase {
            StreamPhase::Ended => return None,
            StreamPhase::NotStarted => match self.connection.begin(&self.cancel).await {
                Step::Ready(()) => self.phase = StreamPhase::Connected,
                Step::Cancelled => return self.finish(None).await,
                Step::Failed(err) => return self.finish(Some(Err(err))).await,
            },
            _ => {}
        }

        loop {
            self.phase = StreamPhase::Receiving;
            let budget = self.buffer.receive_budget();

            let frame = match self.connection.receive(budget, &self.cancel).await {
                Step::Ready(frame) => frame,
                Step::Cancelled => {
                    log::info!("Score feed iteration cancelled by caller");
                    return self.finish(None).await;
                }
                Step::Failed(err) => return self.finish(Some(Err(err))).await,
            };

            if frame.kind != FrameKind::Text {
                log::error!("Received a {} frame on a text-only feed, ending iteration", frame.kind);
                let err = FeedError::UnknownMessageType(format!("{} frame", frame.kind));
                return self.finish(Some(Err(err))).await;
            }

            log::trace!(
                "Frame of {} bytes (end of message: {})",
                frame.payload.len(),
                frame.end_of_message
            );

            match self.buffer.push(&frame.payload, frame.end_of_message) {
                Ok(None) => continue,
                Ok(Some(message)) => {
                    self.phase = StreamPhase::Dispatching;
                    return self.dispatch(&message).await;
                }
                Err(err) => {
                    log::warn!("{}", err);
                    return Some(Err(err));
                }
            }
        }
    }

    async fn dispatch(&mut self, message: &[u8]) -> Option<FeedItem> {
        let decoded = self
            .sniffer
            .sniff(message)
            .and_then(|discriminator| self.decoder.decode(&discriminator, message));

        match decoded {
            Ok(event) => {
                log::debug!(
                    "Dispatched {} for player {} on leaderboard {}",
                    event.kind(),
                    event.player_id(),
                    event.leaderboard_id()
                );
                Some(Ok(event))
            }
            Err(err @ FeedError::UnknownMessageType(_))
                if self.unknown_type_policy == UnknownTypePolicy::Terminate =>
            {
                log::warn!("{}, ending iteration", err);
                self.finish(Some(Err(err))).await
            }
            Err(err) => {
                log::warn!("Skipping message: {}", err);
                Some(Err(err))
            }
        }
    }

    // Runs the teardown and passes `last` through as the final item.
    async fn finish(&mut self, last: Option<FeedItem>) -> Option<FeedItem> {
        self.close().await;
        last
    }

    /// Ends the iteration with a cooperative close. Idempotent.
    pub async fn close(&mut self) {
        self.connection.end().await;
        self.buffer.reset();
        self.phase = StreamPhase::Ended;
    }

    /// Ends the iteration immediately, without a close handshake. Idempotent.
    pub fn dispose(&mut self) {
        self.connection.dispose();
        self.buffer.reset();
        self.phase = StreamPhase::Ended;
    }

    /// Adapts the iterator into a `futures_util::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = FeedItem> + Send {
        futures_util::stream::unfold(self, |mut feed| async move {
            feed.next().await.map(|item| (item, feed))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use futures_util::StreamExt;

    use super::*;
    use crate::feed::client::FeedClient;
    use crate::feed::errors::{TransportError, UsageError};
    use crate::feed::payloads::EventKind;
    use crate::feed::test_support::{binary, text, ScriptedConnector, ScriptedSource};
    use crate::feed::transport::Frame;

    const UPLOAD: &str = r#"{"message":"upload","data":{"playerId":"p1","leaderboardId":"lb1","baseScore":10,"modifiedScore":10,"accuracy":0.5}}"#;
    const ACCEPTED: &str = r#"{"message":"accepted","data":{"playerId":"p1","leaderboardId":"lb1","baseScore":10,"modifiedScore":10,"accuracy":0.5,"pp":1.5,"rank":7}}"#;
    const REJECTED: &str = r#"{"message":"rejected","data":{"playerId":"p2","leaderboardId":"lb2","baseScore":3,"modifiedScore":3,"accuracy":0.1}}"#;

    fn config() -> FeedConfig {
        FeedConfig::with_base_url("ws://feed.test/")
    }

    fn client_with(config: FeedConfig, script: Vec<Result<Frame, TransportError>>) -> FeedClient<ScriptedConnector> {
        let connector = ScriptedConnector::with_source(ScriptedSource::new(script));
        FeedClient::with_connector(config, connector).unwrap()
    }

    fn split(message: &str, at: &[usize]) -> Vec<Result<Frame, TransportError>> {
        let mut frames = Vec::new();
        let mut start = 0;
        for &end in at {
            frames.push(Ok(text(&message[start..end], false)));
            start = end;
        }
        frames.push(Ok(text(&message[start..], true)));
        frames
    }

    fn kind_of(item: &FeedItem) -> &'static str {
        match item {
            Ok(event) => event.kind().as_str(),
            Err(err) => err.kind(),
        }
    }

    #[tokio::test]
    async fn events_arrive_in_wire_order_and_connection_loss_is_last() {
        let mut script = vec![Ok(text(UPLOAD, true))];
        script.extend(split(ACCEPTED, &[5, 40, 90]));
        script.push(Ok(text(REJECTED, true)));
        script.push(Err(TransportError::Reset));

        let client = client_with(config(), script);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        let mut kinds = Vec::new();
        while let Some(item) = feed.next().await {
            kinds.push(kind_of(&item));
        }
        assert_eq!(kinds, ["upload", "accepted", "rejected", "connection_lost"]);
        assert!(feed.is_ended());
        assert_eq!(feed.connection_state(), ConnectionState::Closed);
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn reassembled_message_decodes_identically() {
        let client = client_with(config(), split(ACCEPTED, &[1, 2, 3, 50]));
        let mut feed = client.events(CancellationToken::new()).unwrap();

        let event = feed.next().await.unwrap().unwrap();
        assert_eq!(event.kind(), EventKind::Accepted);
        assert_eq!(event.player_id(), "p1");
        assert_eq!(event.leaderboard_id(), "lb1");
        assert_eq!(feed.phase(), StreamPhase::Dispatching);
    }

    #[tokio::test]
    async fn oversized_message_is_reported_once_and_does_not_leak() {
        let config = FeedConfig {
            max_message_bytes: 200,
            ..config()
        };
        let oversized = format!(r#"{{"message":"upload","data":{{"pad":"{}"}}}}"#, "x".repeat(300));
        let mut script = split(&oversized, &[150, 250]);
        script.push(Ok(text(UPLOAD, true)));

        let client = client_with(config, script);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        let first = feed.next().await.unwrap();
        assert!(matches!(first, Err(FeedError::MessageTooLong { limit: 200 })));

        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second.kind(), EventKind::Upload);
        assert_eq!(second.player_id(), "p1");
    }

    #[tokio::test]
    async fn receive_is_sized_by_free_buffer_space() {
        let config = FeedConfig {
            max_message_bytes: 64,
            ..config()
        };
        let source = ScriptedSource::new(vec![Ok(text("{\"message\":", false)), Ok(text("\"upload\"}", true))]);
        let tracker = source.tracker();
        let client = FeedClient::with_connector(config, ScriptedConnector::with_source(source)).unwrap();
        let mut feed = client.events(CancellationToken::new()).unwrap();

        let _ = feed.next().await;
        assert_eq!(tracker.budgets(), vec![64, 64 - 11]);
    }

    #[tokio::test]
    async fn unknown_type_continues_by_default() {
        let script = vec![
            Ok(text(r#"{"message":"unexpected_type","data":{}}"#, true)),
            Ok(text(UPLOAD, true)),
        ];
        let client = client_with(config(), script);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        match feed.next().await.unwrap() {
            Err(FeedError::UnknownMessageType(name)) => assert_eq!(name, "unexpected_type"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(feed.next().await.unwrap().unwrap().kind(), EventKind::Upload);
    }

    #[tokio::test]
    async fn unknown_type_can_terminate_the_stream() {
        let config = FeedConfig {
            unknown_type_policy: UnknownTypePolicy::Terminate,
            ..config()
        };
        let source = ScriptedSource::new(vec![
            Ok(text(r#"{"message":"unexpected_type","data":{}}"#, true)),
            Ok(text(UPLOAD, true)),
        ]);
        let tracker = source.tracker();
        let client = FeedClient::with_connector(config, ScriptedConnector::with_source(source)).unwrap();
        let mut feed = client.events(CancellationToken::new()).unwrap();

        assert!(matches!(feed.next().await, Some(Err(FeedError::UnknownMessageType(_)))));
        assert!(feed.next().await.is_none());
        assert_eq!(tracker.close_calls(), 1);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn malformed_payload_continues() {
        let script = vec![
            Ok(text(r#"{"message":"upload","data":"not-an-object"}"#, true)),
            Ok(text("definitely not json", true)),
            Ok(text(REJECTED, true)),
        ];
        let client = client_with(config(), script);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        match feed.next().await.unwrap() {
            Err(FeedError::DeserializationError { raw, .. }) => {
                assert_eq!(raw, r#"{"message":"upload","data":"not-an-object"}"#)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            feed.next().await,
            Some(Err(FeedError::DeserializationError { .. }))
        ));
        assert_eq!(feed.next().await.unwrap().unwrap().kind(), EventKind::Rejected);
    }

    #[tokio::test]
    async fn binary_frame_ends_the_stream() {
        let script = vec![Ok(binary(&[0x00, 0x01])), Ok(text(UPLOAD, true))];
        let client = client_with(config(), script);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        match feed.next().await.unwrap() {
            Err(FeedError::UnknownMessageType(name)) => assert_eq!(name, "binary frame"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn second_iteration_is_rejected_without_a_socket() {
        let connector = ScriptedConnector::with_sources(vec![
            ScriptedSource::new(vec![Ok(text(UPLOAD, true))]),
            ScriptedSource::new(vec![Ok(text(REJECTED, true))]),
        ]);
        let connects = connector.connects();
        let client = FeedClient::with_connector(config(), connector).unwrap();

        let mut first = client.events(CancellationToken::new()).unwrap();
        assert!(first.next().await.unwrap().is_ok());
        assert!(client.is_active());

        assert_eq!(client.events(CancellationToken::new()).err(), Some(UsageError::AlreadyActive));
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        first.close().await;
        assert!(!client.is_active());

        // Sequential reuse opens a fresh connection.
        let mut second = client.events(CancellationToken::new()).unwrap();
        assert_eq!(second.next().await.unwrap().unwrap().kind(), EventKind::Rejected);
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejection_happens_before_the_first_pull() {
        let client = client_with(config(), vec![]);
        let _first = client.events(CancellationToken::new()).unwrap();
        assert!(client.events(CancellationToken::new()).is_err());
    }

    #[tokio::test]
    async fn cancellation_mid_receive_ends_silently() {
        let source = ScriptedSource::new(vec![Ok(text(UPLOAD, true))]);
        let tracker = source.tracker();
        let client = FeedClient::with_connector(config(), ScriptedConnector::with_source(source)).unwrap();
        let cancel = CancellationToken::new();
        let mut feed = client.events(cancel.clone()).unwrap();

        assert!(feed.next().await.unwrap().is_ok());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(feed.next().await.is_none());
        assert_eq!(tracker.close_calls(), 1);
        assert!(!client.is_active());

        // Closing again after cancellation is harmless.
        feed.close().await;
        feed.dispose();
    }

    #[tokio::test]
    async fn cancellation_before_connect_is_silent() {
        let connector = ScriptedConnector::hanging();
        let client = FeedClient::with_connector(config(), connector).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut feed = client.events(cancel).unwrap();
        assert!(feed.next().await.is_none());
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn connect_failure_is_emitted_once() {
        let client = FeedClient::with_connector(config(), ScriptedConnector::failing()).unwrap();
        let mut feed = client.events(CancellationToken::new()).unwrap();

        assert!(matches!(feed.next().await, Some(Err(FeedError::ConnectionError { .. }))));
        assert!(feed.next().await.is_none());
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn teardown_is_idempotent_even_before_connecting() {
        let client = client_with(config(), vec![]);
        let mut feed = client.events(CancellationToken::new()).unwrap();

        feed.dispose();
        feed.dispose();
        feed.close().await;
        assert!(feed.next().await.is_none());
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_socket_and_guard() {
        let source = ScriptedSource::new(vec![Ok(text(UPLOAD, true))]);
        let tracker = source.tracker();
        let client = FeedClient::with_connector(config(), ScriptedConnector::with_source(source)).unwrap();

        let mut feed = client.events(CancellationToken::new()).unwrap();
        assert!(feed.next().await.unwrap().is_ok());
        drop(feed);

        assert!(tracker.is_dropped());
        assert_eq!(tracker.close_calls(), 0);
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn into_stream_yields_the_same_items() {
        let script = vec![
            Ok(text(UPLOAD, true)),
            Ok(text(REJECTED, true)),
            Err(TransportError::RemoteClosed("1000 bye".to_string())),
        ];
        let client = client_with(config(), script);
        let items: Vec<FeedItem> = client
            .events(CancellationToken::new())
            .unwrap()
            .into_stream()
            .collect()
            .await;

        let kinds: Vec<_> = items.iter().map(kind_of).collect();
        assert_eq!(kinds, ["upload", "rejected", "connection_lost"]);
        match items.last() {
            Some(Err(FeedError::ConnectionLost { reason, .. })) => assert!(reason.contains("1000 bye")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
