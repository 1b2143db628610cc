//! WebSocket protocol support (RFC 6455).
//!
//! Covers what the server core needs: the upgrade handshake accept key
//! (§4.2.2) and a server-side frame codec (§5). Client frames must be
//! masked and are unmasked on read; server frames are written unmasked.

use crate::error::WebsocketError;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::rc::Rc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// RFC 6455 GUID mixed into the `Sec-WebSocket-Accept` digest.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on an assembled message, fragments included.
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Compute `Sec-WebSocket-Accept` from the client's `Sec-WebSocket-Key`:
/// base64(SHA1(key || GUID)).
#[must_use]
pub fn websocket_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Frame opcode (RFC 6455 §5.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text (0x1).
    Text,
    /// Binary (0x2).
    Binary,
    /// Connection close (0x8).
    Close,
    /// Ping (0x9).
    Ping,
    /// Pong (0xA).
    Pong,
}

impl Opcode {
    fn from_u8(b: u8) -> Option<Self> {
        match b & 0x0f {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// An assembled WebSocket message: an opaque framed buffer with an opcode.
///
/// An empty data message signals close, as does a CLOSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsMessage {
    /// Message opcode.
    pub opcode: Opcode,
    /// Message payload (unmasked).
    pub payload: Vec<u8>,
}

impl WsMessage {
    /// Build a message.
    #[must_use]
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    /// A text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    /// A binary message.
    #[must_use]
    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, payload.into())
    }

    /// The close marker.
    #[must_use]
    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }

    /// Whether this message ends the session: a CLOSE frame, or an empty
    /// text/binary message.
    #[must_use]
    pub fn is_close(&self) -> bool {
        match self.opcode {
            Opcode::Close => true,
            Opcode::Text | Opcode::Binary | Opcode::Continuation => self.payload.is_empty(),
            Opcode::Ping | Opcode::Pong => false,
        }
    }

    /// Payload interpreted as UTF-8, when valid.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A raw frame off the wire.
#[derive(Debug)]
struct Frame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

/// A server-side WebSocket connection.
///
/// Constructed from a TCP stream plus any bytes the HTTP layer had already
/// buffered past the upgrade request — the client may pipeline frames
/// behind the handshake, and those bytes belong to this session.
#[derive(Debug)]
pub struct ConnectedWebsocket {
    stream: TcpStream,
    rx: Vec<u8>,
    partial: Option<(Opcode, Vec<u8>)>,
    shutdown: Option<Rc<Notify>>,
}

impl ConnectedWebsocket {
    /// Wrap a stream, seeding the read buffer with already-received bytes.
    #[must_use]
    pub fn new(stream: TcpStream, buffered: Vec<u8>) -> Self {
        Self {
            stream,
            rx: buffered,
            partial: None,
            shutdown: None,
        }
    }

    /// Attach a cooperative shutdown signal. When notified, in-flight reads
    /// and writes complete with a `ConnectionAborted` I/O error.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Rc<Notify>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Peer address of the underlying stream.
    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }

    async fn read_some(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let shutdown = self.shutdown.clone();
        match shutdown {
            Some(token) => tokio::select! {
                biased;
                _ = token.notified() => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "connection shut down",
                )),
                r = self.stream.read(buf) => r,
            },
            None => self.stream.read(buf).await,
        }
    }

    /// Grow the buffer to at least `n` bytes. `Ok(false)` means the peer
    /// closed cleanly before the first byte of the next frame.
    async fn fill_to(&mut self, n: usize) -> Result<bool, WebsocketError> {
        while self.rx.len() < n {
            let mut tmp = [0u8; 4096];
            let read = self.read_some(&mut tmp).await?;
            if read == 0 {
                if self.rx.is_empty() {
                    return Ok(false);
                }
                return Err(WebsocketError::Protocol("connection closed mid-frame"));
            }
            self.rx.extend_from_slice(&tmp[..read]);
        }
        Ok(true)
    }

    fn take(&mut self, n: usize) -> Vec<u8> {
        self.rx.drain(..n).collect()
    }

    /// Read one frame. `Ok(None)` on clean EOF at a frame boundary.
    async fn read_frame(&mut self) -> Result<Option<Frame>, WebsocketError> {
        if !self.fill_to(2).await? {
            return Ok(None);
        }
        let b0 = self.rx[0];
        let b1 = self.rx[1];

        let fin = (b0 & 0x80) != 0;
        if (b0 >> 4) & 0x07 != 0 {
            return Err(WebsocketError::Protocol(
                "reserved bits must be 0 (no extensions negotiated)",
            ));
        }
        let opcode = Opcode::from_u8(b0).ok_or(WebsocketError::Protocol("invalid opcode"))?;
        if opcode.is_control() && !fin {
            return Err(WebsocketError::Protocol(
                "control frames must not be fragmented",
            ));
        }
        let masked = (b1 & 0x80) != 0;
        if !masked {
            return Err(WebsocketError::Protocol(
                "client->server frames must be masked",
            ));
        }

        let len7 = u64::from(b1 & 0x7f);
        let (len, header_len) = match len7 {
            126 => {
                self.fill_to(4).await?;
                let len = u64::from(u16::from_be_bytes([self.rx[2], self.rx[3]]));
                (len, 4)
            }
            127 => {
                self.fill_to(10).await?;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&self.rx[2..10]);
                let len = u64::from_be_bytes(bytes);
                if (len >> 63) != 0 {
                    return Err(WebsocketError::Protocol("invalid 64-bit length"));
                }
                (len, 10)
            }
            n => (n, 2),
        };

        let payload_len =
            usize::try_from(len).map_err(|_| WebsocketError::Protocol("frame too large"))?;
        if opcode.is_control() && payload_len > 125 {
            return Err(WebsocketError::Protocol("control frame too large"));
        }
        if payload_len > MAX_MESSAGE_BYTES {
            return Err(WebsocketError::Protocol("frame too large"));
        }

        self.fill_to(header_len + 4 + payload_len).await?;
        self.take(header_len);
        let mask_bytes = self.take(4);
        let mut mask = [0u8; 4];
        mask.copy_from_slice(&mask_bytes);
        let mut payload = self.take(payload_len);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }

        Ok(Some(Frame {
            fin,
            opcode,
            payload,
        }))
    }

    /// Read the next message, reassembling fragments.
    ///
    /// Control frames interleaved inside a fragmented message are returned
    /// as their own messages; the partial data message is kept and resumes
    /// on the next call. Clean EOF and CLOSE frames both come back as the
    /// close marker.
    pub async fn read_message(&mut self) -> Result<WsMessage, WebsocketError> {
        loop {
            let Some(frame) = self.read_frame().await? else {
                return Ok(WsMessage::close());
            };
            match frame.opcode {
                Opcode::Close => return Ok(WsMessage::new(Opcode::Close, frame.payload)),
                Opcode::Ping => return Ok(WsMessage::new(Opcode::Ping, frame.payload)),
                Opcode::Pong => return Ok(WsMessage::new(Opcode::Pong, frame.payload)),
                Opcode::Continuation => {
                    let Some((opcode, mut buf)) = self.partial.take() else {
                        return Err(WebsocketError::Protocol(
                            "continuation frame without a preceding data frame",
                        ));
                    };
                    if buf.len() + frame.payload.len() > MAX_MESSAGE_BYTES {
                        return Err(WebsocketError::Protocol("message too large"));
                    }
                    buf.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return self.finish_message(opcode, buf);
                    }
                    self.partial = Some((opcode, buf));
                }
                Opcode::Text | Opcode::Binary => {
                    if self.partial.is_some() {
                        return Err(WebsocketError::Protocol(
                            "new data frame while a fragmented message is in flight",
                        ));
                    }
                    if frame.fin {
                        return self.finish_message(frame.opcode, frame.payload);
                    }
                    self.partial = Some((frame.opcode, frame.payload));
                }
            }
        }
    }

    fn finish_message(
        &mut self,
        opcode: Opcode,
        payload: Vec<u8>,
    ) -> Result<WsMessage, WebsocketError> {
        if opcode == Opcode::Text {
            std::str::from_utf8(&payload)?;
        }
        Ok(WsMessage::new(opcode, payload))
    }

    /// Write one message as a single unmasked frame and flush.
    pub async fn write_message(&mut self, msg: &WsMessage) -> Result<(), WebsocketError> {
        let frame = encode_frame(msg.opcode, &msg.payload);
        let shutdown = self.shutdown.clone();
        let write = async {
            self.stream.write_all(&frame).await?;
            self.stream.flush().await
        };
        match shutdown {
            Some(token) => tokio::select! {
                biased;
                _ = token.notified() => Err(WebsocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionAborted,
                    "connection shut down",
                ))),
                r = write => r.map_err(WebsocketError::Io),
            },
            None => write.await.map_err(WebsocketError::Io),
        }
    }

    /// Send a CLOSE frame; the peer is expected to echo it and hang up.
    pub async fn send_close(&mut self) -> Result<(), WebsocketError> {
        self.write_message(&WsMessage::close()).await
    }
}

/// Encode a final, unmasked server frame.
fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode.to_u8());
    if payload.len() < 126 {
        out.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_known_vector() {
        // RFC 6455 §1.3 sample handshake.
        assert_eq!(
            websocket_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_key_trims_whitespace() {
        assert_eq!(
            websocket_accept_key("  dGhlIHNhbXBsZSBub25jZQ==  "),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn encode_small_frame() {
        let frame = encode_frame(Opcode::Text, b"hi");
        assert_eq!(frame, vec![0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn encode_medium_frame_uses_16_bit_length() {
        let payload = vec![0u8; 300];
        let frame = encode_frame(Opcode::Binary, &payload);
        assert_eq!(frame[0], 0x82);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 300);
        assert_eq!(frame.len(), 4 + 300);
    }

    #[test]
    fn close_marker_is_close() {
        assert!(WsMessage::close().is_close());
        assert!(WsMessage::text("").is_close());
        assert!(!WsMessage::text("x").is_close());
        assert!(!WsMessage::new(Opcode::Ping, Vec::new()).is_close());
    }

    #[test]
    fn opcode_round_trip() {
        for op in [
            Opcode::Continuation,
            Opcode::Text,
            Opcode::Binary,
            Opcode::Close,
            Opcode::Ping,
            Opcode::Pong,
        ] {
            assert_eq!(Opcode::from_u8(op.to_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x3), None);
    }

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn masked_frame(fin: bool, opcode: u8, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
        assert!(payload.len() <= 125);
        let mut out = Vec::with_capacity(6 + payload.len());
        out.push(if fin { 0x80 } else { 0x00 } | opcode);
        out.push(0x80 | payload.len() as u8);
        out.extend_from_slice(&mask);
        for (i, &b) in payload.iter().enumerate() {
            out.push(b ^ mask[i & 3]);
        }
        out
    }

    #[tokio::test]
    async fn reads_masked_text_message() {
        let (mut client, server) = socket_pair().await;
        let mut ws = ConnectedWebsocket::new(server, Vec::new());

        client
            .write_all(&masked_frame(true, 0x1, b"hello", [1, 2, 3, 4]))
            .await
            .unwrap();
        let msg = ws.read_message().await.unwrap();
        assert_eq!(msg.opcode, Opcode::Text);
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn rejects_unmasked_client_frame() {
        let (mut client, server) = socket_pair().await;
        let mut ws = ConnectedWebsocket::new(server, Vec::new());

        client.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();
        let err = ws.read_message().await.unwrap_err();
        assert!(matches!(err, WebsocketError::Protocol(_)));
    }

    #[tokio::test]
    async fn reassembles_fragmented_message() {
        let (mut client, server) = socket_pair().await;
        let mut ws = ConnectedWebsocket::new(server, Vec::new());

        client
            .write_all(&masked_frame(false, 0x1, b"he", [9, 9, 9, 9]))
            .await
            .unwrap();
        client
            .write_all(&masked_frame(true, 0x0, b"llo", [7, 7, 7, 7]))
            .await
            .unwrap();
        let msg = ws.read_message().await.unwrap();
        assert_eq!(msg.payload, b"hello");
    }

    #[tokio::test]
    async fn buffered_prefix_is_consumed_first() {
        let (client, server) = socket_pair().await;
        let prefix = masked_frame(true, 0x2, &[0xAA, 0xBB], [5, 6, 7, 8]);
        let mut ws = ConnectedWebsocket::new(server, prefix);

        let msg = ws.read_message().await.unwrap();
        assert_eq!(msg.opcode, Opcode::Binary);
        assert_eq!(msg.payload, vec![0xAA, 0xBB]);
        drop(client);
        // After the prefix the socket is empty and closed: close marker.
        let msg = ws.read_message().await.unwrap();
        assert!(msg.is_close());
    }

    #[tokio::test]
    async fn close_frame_returns_close_marker() {
        let (mut client, server) = socket_pair().await;
        let mut ws = ConnectedWebsocket::new(server, Vec::new());

        client
            .write_all(&masked_frame(true, 0x8, &[], [0, 0, 0, 0]))
            .await
            .unwrap();
        let msg = ws.read_message().await.unwrap();
        assert!(msg.is_close());
    }

    #[tokio::test]
    async fn writes_unmasked_frame() {
        let (mut client, server) = socket_pair().await;
        let mut ws = ConnectedWebsocket::new(server, Vec::new());

        ws.write_message(&WsMessage::text("pong")).await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0x81, 0x04, b'p', b'o', b'n', b'g']);
    }
}
