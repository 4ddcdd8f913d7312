//! Byte-stream abstraction shared by plaintext and TLS connections.
//!
//! The session layer is written once against [`ByteStream`]; the detector
//! decides which implementation a connection gets.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_rustls::TlsAcceptor;
use tracing::trace;

/// Which kind of stream a session runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Tls,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Plain => "plain",
            Transport::Tls => "tls",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered, reliable, bidirectional byte stream.
#[async_trait]
pub trait ByteStream: Send {
    /// Append whatever is available to `buf`. `Ok(0)` means the peer closed.
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Write and flush all of `data`.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Graceful close of our sending side: TCP half-close for plaintext,
    /// `close_notify` for TLS.
    async fn shutdown(&mut self) -> io::Result<()>;

    fn transport(&self) -> Transport;
}

/// Unencrypted stream, typically a `TcpStream`
#[derive(Debug)]
pub struct PlainStream<IO> {
    io: IO,
}

impl<IO> PlainStream<IO> {
    pub fn new(io: IO) -> Self {
        Self { io }
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

#[async_trait]
impl<IO> ByteStream for PlainStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.io.read_buf(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.write_all(data).await?;
        self.io.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.io.shutdown().await
    }

    fn transport(&self) -> Transport {
        Transport::Plain
    }
}

/// Server side of a completed TLS handshake
pub struct TlsStream<IO> {
    inner: tokio_rustls::server::TlsStream<Rewind<IO>>,
}

impl<IO> TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Run the server handshake. `buffered` holds the bytes already consumed
    /// while sniffing the connection; they are fed to rustls first.
    pub async fn accept(acceptor: &TlsAcceptor, io: IO, buffered: Bytes) -> io::Result<Self> {
        let inner = acceptor.accept(Rewind::new(io, buffered)).await?;
        Ok(Self { inner })
    }

    /// Negotiated ALPN protocol, if any
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.inner.get_ref().1.alpn_protocol()
    }

    /// SNI host name the client asked for
    pub fn server_name(&self) -> Option<&str> {
        self.inner.get_ref().1.server_name()
    }
}

impl<IO> std::fmt::Debug for TlsStream<IO> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream").finish_non_exhaustive()
    }
}

#[async_trait]
impl<IO> ByteStream for TlsStream<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self.inner.read_buf(buf).await {
            // peers that drop the TCP connection without close_notify
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                trace!("TLS peer closed without close_notify");
                Ok(0)
            }
            other => other,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    fn transport(&self) -> Transport {
        Transport::Tls
    }
}

/// Replays a prefix of already-read bytes before reading from `inner`.
#[derive(Debug)]
pub struct Rewind<IO> {
    prefix: Bytes,
    inner: IO,
}

impl<IO> Rewind<IO> {
    pub fn new(inner: IO, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }

    pub fn into_inner(self) -> (IO, Bytes) {
        (self.inner, self.prefix)
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for Rewind<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if !this.prefix.is_empty() {
            let n = this.prefix.len().min(buf.remaining());
            buf.put_slice(&this.prefix[..n]);
            this.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<IO: AsyncWrite + Unpin> AsyncWrite for Rewind<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
