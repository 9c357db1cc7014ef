//! # Feed Transport
//!
//! The seam between the feed protocol and the socket. A `Connector` opens a
//! `FrameSource` for a URL; the source hands out data frames no larger than
//! the size the caller asks for, each tagged with its frame type and an
//! end-of-message flag.
//!
//! `WsConnector` is the production implementation. It performs the HTTP
//! upgrade with tungstenite's request and accept-key helpers, then reads the
//! socket one WebSocket frame header at a time. Payload bytes are pulled in
//! slices of at most `READ_CHUNK` and handed out in slices of at most the
//! caller's budget, so a message is never held in full below the feed
//! buffer. Pings are answered here and never reach the caller.

use std::fmt;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::generate_request;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Control, Data, OpCode};
use tokio_tungstenite::tungstenite::protocol::frame::{Frame as WireFrame, FrameHeader};
use tokio_tungstenite::MaybeTlsStream;
use url::Url;

use crate::feed::errors::TransportError;

/// Upper bound of a single socket read.
const READ_CHUNK: usize = 16 * 1024;

/// Upper bound of the HTTP upgrade response head.
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// RFC 6455 limit for control frame payloads.
const MAX_CONTROL_PAYLOAD: u64 = 125;

/// The WebSocket data frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Text => f.write_str("text"),
            FrameKind::Binary => f.write_str("binary"),
        }
    }
}

/// One receive result: a slice of a message plus its framing metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
    /// `true` when this slice completes the logical message.
    pub end_of_message: bool,
}

/// # Frame Source
///
/// An open, exclusively owned connection to the feed.
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next data frame, returning at most `max_len` payload bytes.
    ///
    /// `max_len` must be non-zero. Every error is final for the connection.
    async fn receive(&mut self, max_len: usize) -> Result<Frame, TransportError>;

    /// Performs the cooperative close handshake.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// # Connector
///
/// Opens frame sources. Shared by every iteration of a client.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Source: FrameSource + 'static;

    async fn connect(&self, url: &Url) -> Result<Self::Source, TransportError>;
}

/// Production connector for `ws://` and `wss://` feeds.
#[derive(Debug, Default)]
pub struct WsConnector {
    /// Built on the first `wss://` connect and reused afterwards.
    tls: OnceLock<Arc<ClientConfig>>,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        if let Some(config) = self.tls.get() {
            return Ok(Arc::clone(config));
        }
        let config = Arc::new(build_tls_config()?);
        Ok(Arc::clone(self.tls.get_or_init(|| config)))
    }

    async fn open_socket(&self, url: &Url) -> Result<MaybeTlsStream<TcpStream>, TransportError> {
        let host = url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| TransportError::InvalidHost(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidHost(url.to_string()))?;

        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;

        match url.scheme() {
            "ws" => Ok(MaybeTlsStream::Plain(tcp)),
            "wss" => {
                let domain = ServerName::try_from(host.to_string())
                    .map_err(|e| TransportError::InvalidHost(format!("{host}: {e}")))?;
                let tls = TlsConnector::from(self.tls_config()?)
                    .connect(domain, tcp)
                    .await?;
                Ok(MaybeTlsStream::Rustls(tls))
            }
            other => Err(TransportError::Protocol(format!("unsupported scheme `{other}`"))),
        }
    }
}

/// Root store from the platform certificates, with the ring provider.
fn build_tls_config() -> Result<ClientConfig, TransportError> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in native.errors {
        log::warn!("Error loading a native certificate: {}", error);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    log::debug!("Loaded {} native root certificates ({} ignored)", added, ignored);

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(config)
}

#[async_trait]
impl Connector for WsConnector {
    type Source = WsFrameSource;

    async fn connect(&self, url: &Url) -> Result<WsFrameSource, TransportError> {
        let mut io = self.open_socket(url).await?;

        let (request, key) = generate_request(url.as_str().into_client_request()?)?;
        io.write_all(&request).await?;
        io.flush().await?;

        let mut read_buf = BytesMut::with_capacity(1024);
        let head_len = loop {
            if let Some(len) = head_length(&read_buf) {
                break len;
            }
            if read_buf.len() >= MAX_HANDSHAKE_BYTES {
                return Err(TransportError::Protocol("upgrade response too large".to_string()));
            }
            if io.read_buf(&mut read_buf).await? == 0 {
                return Err(TransportError::Reset);
            }
        };
        let head = read_buf.split_to(head_len);
        let status = verify_upgrade(&head, &key)?;
        log::debug!("WebSocket handshake with {} answered {}", url, status);

        // Whatever followed the response head already belongs to the first frames.
        Ok(WsFrameSource::new(io, read_buf))
    }
}

/// Length of the response head including its blank line, once complete.
fn head_length(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Checks an HTTP upgrade response head and returns its status line.
fn verify_upgrade(head: &[u8], key: &str) -> Result<String, TransportError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| TransportError::Protocol("upgrade response is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");
    let status = lines.next().unwrap_or_default().to_string();
    if status.split_whitespace().nth(1) != Some("101") {
        return Err(TransportError::Protocol(format!("server answered `{status}`")));
    }

    let header = |name: &str| {
        text.split("\r\n")
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .find(|(n, _)| n.trim().eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim())
    };

    if !header("Upgrade").is_some_and(|v| v.eq_ignore_ascii_case("websocket")) {
        return Err(TransportError::Protocol("missing `Upgrade: websocket`".to_string()));
    }
    if !header("Connection")
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")))
    {
        return Err(TransportError::Protocol("missing `Connection: upgrade`".to_string()));
    }
    if header("Sec-WebSocket-Accept") != Some(derive_accept_key(key.as_bytes()).as_str()) {
        return Err(TransportError::Protocol("wrong `Sec-WebSocket-Accept`".to_string()));
    }
    Ok(status)
}

/// Renders a close frame payload as `"<code> <reason>"`.
fn close_reason(payload: &[u8]) -> String {
    match payload {
        [hi, lo, reason @ ..] => format!(
            "{} {}",
            u16::from_be_bytes([*hi, *lo]),
            String::from_utf8_lossy(reason)
        ),
        _ => "no close reason".to_string(),
    }
}

/// Data frame whose payload is still on the socket.
#[derive(Debug, Clone, Copy)]
struct PendingPayload {
    kind: FrameKind,
    remaining: u64,
    is_final: bool,
}

/// A live WebSocket connection read frame by frame.
pub struct WsFrameSource {
    io: MaybeTlsStream<TcpStream>,
    read_buf: BytesMut,
    current: Option<PendingPayload>,
    /// Kind of the fragmented message in progress, if any.
    fragmented: Option<FrameKind>,
    close_sent: bool,
    close_received: bool,
}

impl WsFrameSource {
    fn new(io: MaybeTlsStream<TcpStream>, read_buf: BytesMut) -> Self {
        Self {
            io,
            read_buf,
            current: None,
            fragmented: None,
            close_sent: false,
            close_received: false,
        }
    }

    async fn fill(&mut self) -> Result<(), TransportError> {
        self.read_buf.reserve(READ_CHUNK);
        let read = (&mut self.io)
            .take(READ_CHUNK as u64)
            .read_buf(&mut self.read_buf)
            .await?;
        if read == 0 {
            return Err(TransportError::Reset);
        }
        Ok(())
    }

    async fn read_header(&mut self) -> Result<(FrameHeader, u64), TransportError> {
        loop {
            let mut cursor = Cursor::new(&self.read_buf[..]);
            let parsed = FrameHeader::parse(&mut cursor)?;
            let consumed = cursor.position() as usize;
            if let Some(header) = parsed {
                self.read_buf.advance(consumed);
                return Ok(header);
            }
            self.fill().await?;
        }
    }

    async fn read_control_payload(&mut self, len: usize) -> Result<Bytes, TransportError> {
        while self.read_buf.len() < len {
            self.fill().await?;
        }
        Ok(self.read_buf.split_to(len).freeze())
    }

    async fn discard(&mut self, mut len: u64) -> Result<(), TransportError> {
        while len > 0 {
            if self.read_buf.is_empty() {
                self.fill().await?;
            }
            let n = self.read_buf.len().min(usize::try_from(len).unwrap_or(usize::MAX));
            self.read_buf.advance(n);
            len -= n as u64;
        }
        Ok(())
    }

    /// Client frames are always masked.
    async fn send_control(&mut self, mut frame: WireFrame) -> Result<(), TransportError> {
        frame.header_mut().mask = Some(rand::random());
        let mut out = Vec::with_capacity(frame.len());
        frame.format(&mut out)?;
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Starts the next data frame, or handles a control frame in place.
    async fn next_header(&mut self) -> Result<(), TransportError> {
        let (header, len) = self.read_header().await?;
        if header.mask.is_some() {
            return Err(TransportError::Protocol("server sent a masked frame".to_string()));
        }

        match header.opcode {
            OpCode::Data(data) => {
                let kind = match (data, self.fragmented) {
                    (Data::Text, None) => FrameKind::Text,
                    (Data::Binary, None) => FrameKind::Binary,
                    (Data::Continue, Some(kind)) => kind,
                    (other, _) => {
                        return Err(TransportError::Protocol(format!("unexpected {other} frame")))
                    }
                };
                self.fragmented = (!header.is_final).then_some(kind);
                self.current = Some(PendingPayload {
                    kind,
                    remaining: len,
                    is_final: header.is_final,
                });
                Ok(())
            }
            OpCode::Control(control) => {
                if len > MAX_CONTROL_PAYLOAD || !header.is_final {
                    return Err(TransportError::Protocol(format!(
                        "invalid {control} frame of {len} bytes"
                    )));
                }
                let payload = self.read_control_payload(len as usize).await?;
                match control {
                    Control::Ping => self.send_control(WireFrame::pong(payload)).await,
                    Control::Pong => {
                        log::trace!("Pong received");
                        Ok(())
                    }
                    Control::Close => {
                        self.close_received = true;
                        if !self.close_sent {
                            self.close_sent = true;
                            if let Err(err) = self.send_control(WireFrame::close(None)).await {
                                log::debug!("Could not answer the close frame: {}", err);
                            }
                        }
                        Err(TransportError::RemoteClosed(close_reason(&payload)))
                    }
                    Control::Reserved(code) => Err(TransportError::Protocol(format!(
                        "reserved control opcode {code}"
                    ))),
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn receive(&mut self, max_len: usize) -> Result<Frame, TransportError> {
        loop {
            let Some(pending) = self.current else {
                self.next_header().await?;
                continue;
            };

            if pending.remaining == 0 && !pending.is_final {
                // An empty fragment carries nothing to hand out.
                self.current = None;
                continue;
            }
            if pending.remaining > 0 && self.read_buf.is_empty() {
                self.fill().await?;
            }

            let take = usize::try_from(pending.remaining)
                .unwrap_or(usize::MAX)
                .min(max_len)
                .min(self.read_buf.len());
            let payload = self.read_buf.split_to(take).freeze();
            let remaining = pending.remaining - take as u64;
            self.current = (remaining > 0).then_some(PendingPayload {
                remaining,
                ..pending
            });

            return Ok(Frame {
                kind: pending.kind,
                payload,
                end_of_message: remaining == 0 && pending.is_final,
            });
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.fragmented = None;
        if !self.close_sent {
            self.close_sent = true;
            self.send_control(WireFrame::close(None)).await?;
        }

        if !self.close_received {
            if let Some(pending) = self.current.take() {
                self.discard(pending.remaining).await?;
            }
            // Skip whatever is still in flight until the peer's close frame.
            loop {
                let (header, len) = self.read_header().await?;
                if header.opcode == OpCode::Control(Control::Close) {
                    self.close_received = true;
                    break;
                }
                self.discard(len).await?;
            }
        }

        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn response(status: &str, accept: &str) -> String {
        format!(
            "{status}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
    }

    #[test]
    fn head_length_waits_for_the_blank_line() {
        assert_eq!(head_length(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n"), None);
        let buf = b"HTTP/1.1 101 OK\r\n\r\n\x81\x02hi";
        assert_eq!(head_length(buf), Some(19));
    }

    #[test]
    fn upgrade_is_accepted_with_the_derived_key() {
        // RFC 6455 section 1.3 sample.
        assert_eq!(derive_accept_key(KEY.as_bytes()), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let head = response("HTTP/1.1 101 Switching Protocols", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            verify_upgrade(head.as_bytes(), KEY).unwrap(),
            "HTTP/1.1 101 Switching Protocols"
        );
    }

    #[test]
    fn upgrade_header_names_are_case_insensitive() {
        let head = "HTTP/1.1 101 Switching Protocols\r\nupgrade: WebSocket\r\nconnection: keep-alive, Upgrade\r\nsec-websocket-accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        assert!(verify_upgrade(head.as_bytes(), KEY).is_ok());
    }

    #[test]
    fn upgrade_rejects_other_statuses_and_wrong_keys() {
        let refused = response("HTTP/1.1 403 Forbidden", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        match verify_upgrade(refused.as_bytes(), KEY) {
            Err(TransportError::Protocol(msg)) => assert!(msg.contains("403"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }

        let wrong = response("HTTP/1.1 101 Switching Protocols", "bm90IHRoZSBrZXk=");
        assert!(matches!(
            verify_upgrade(wrong.as_bytes(), KEY),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn close_reason_renders_code_and_text() {
        assert_eq!(close_reason(&[0x03, 0xE8, b'b', b'y', b'e']), "1000 bye");
        assert_eq!(close_reason(&[0x03, 0xE9]), "1001 ");
        assert_eq!(close_reason(&[]), "no close reason");
    }

    #[test]
    fn outgoing_control_frames_are_masked() {
        let mut frame = WireFrame::pong(Bytes::from_static(b"hb"));
        frame.header_mut().mask = Some([1, 2, 3, 4]);
        let mut out = Vec::new();
        frame.format(&mut out).unwrap();

        assert_eq!(out[0], 0x8A);
        assert_eq!(out[1], 0x80 | 2);
        assert_eq!(&out[2..6], &[1, 2, 3, 4]);
        assert_eq!(&out[6..], &[b'h' ^ 1, b'b' ^ 2]);
    }
}
