//! Plaintext/TLS detection on the first bytes of a connection.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, trace, warn};

use crate::session::{ConnectionContext, Session, SessionSummary};
use crate::stream::{PlainStream, TlsStream};

/// TLS record content type for handshake messages
const HANDSHAKE_RECORD: u8 = 0x16;
/// Handshake message type of a ClientHello
const CLIENT_HELLO: u8 = 0x01;
/// Smallest record that can carry a ClientHello
const MIN_CLIENT_HELLO_LEN: usize = 34;

const DETECT_BUFFER: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Tls,
    Plain,
    /// More bytes are needed to decide
    Incomplete,
}

/// Classify the start of a connection.
///
/// Looks at no more than six bytes: the record type, the record length and
/// the handshake message type.
pub fn detect_tls(buf: &[u8]) -> Detection {
    let Some(&record_type) = buf.first() else {
        return Detection::Incomplete;
    };
    if record_type != HANDSHAKE_RECORD {
        return Detection::Plain;
    }
    if buf.len() < 5 {
        return Detection::Incomplete;
    }
    let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
    if record_len < MIN_CLIENT_HELLO_LEN {
        return Detection::Plain;
    }
    if buf.len() < 6 {
        return Detection::Incomplete;
    }
    if buf[5] == CLIENT_HELLO {
        Detection::Tls
    } else {
        Detection::Plain
    }
}

/// Sniffs a fresh connection and hands it to a plaintext or TLS session.
pub struct Detector<IO> {
    io: IO,
    peer: SocketAddr,
    ctx: ConnectionContext,
    tls: Option<TlsAcceptor>,
}

impl<IO> Detector<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(io: IO, peer: SocketAddr, ctx: ConnectionContext, tls: Option<TlsAcceptor>) -> Self {
        Self { io, peer, ctx, tls }
    }

    /// Detect, then serve the connection to completion.
    ///
    /// Returns `None` when the connection was dropped before a session
    /// started (timeout, early close, failed handshake).
    pub async fn run(mut self) -> Option<SessionSummary> {
        let idle_timeout = self.ctx.config.idle_timeout;
        let mut buffer = BytesMut::with_capacity(DETECT_BUFFER);

        let detection = loop {
            match detect_tls(&buffer) {
                Detection::Incomplete => {}
                decided => break decided,
            }
            match timeout(idle_timeout, self.io.read_buf(&mut buffer)).await {
                Err(_) => {
                    debug!(peer = %self.peer, "Timed out waiting for first bytes");
                    return None;
                }
                Ok(Err(e)) => {
                    debug!(peer = %self.peer, error = %e, "Read failed during detection");
                    return None;
                }
                Ok(Ok(0)) => {
                    trace!(peer = %self.peer, "Connection closed before any request");
                    return None;
                }
                Ok(Ok(_)) => {}
            }
        };

        trace!(peer = %self.peer, detection = ?detection, buffered = buffer.len(), "Detected transport");
        match detection {
            Detection::Tls => self.run_tls(buffer).await,
            _ => {
                let stream = PlainStream::new(self.io);
                Some(Session::new(stream, self.ctx, self.peer, buffer).run().await)
            }
        }
    }

    async fn run_tls(self, buffer: BytesMut) -> Option<SessionSummary> {
        let Some(acceptor) = self.tls else {
            warn!(peer = %self.peer, "TLS ClientHello received but TLS is not configured");
            return None;
        };

        let idle_timeout = self.ctx.config.idle_timeout;
        let handshake = TlsStream::accept(&acceptor, self.io, buffer.freeze());
        match timeout(idle_timeout, handshake).await {
            Err(_) => {
                debug!(peer = %self.peer, "TLS handshake timed out");
                None
            }
            Ok(Err(e)) => {
                warn!(peer = %self.peer, error = %e, "TLS handshake failed");
                None
            }
            Ok(Ok(stream)) => {
                debug!(
                    peer = %self.peer,
                    sni = stream.server_name().unwrap_or("-"),
                    alpn = ?stream.alpn_protocol().map(String::from_utf8_lossy),
                    "TLS handshake complete"
                );
                Some(Session::new(stream, self.ctx, self.peer, BytesMut::new()).run().await)
            }
        }
    }
}
