//! TCP accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::Result;
use crate::detect::Detector;
use crate::session::ConnectionContext;

const LISTEN_BACKLOG: u32 = 1024;

/// Pause after a failed accept so fd exhaustion does not spin the loop
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// A bound listening socket that spawns one task per accepted connection
pub struct Listener {
    listener: TcpListener,
    ctx: ConnectionContext,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Open, configure and bind the listening socket
    pub async fn bind(ctx: ConnectionContext, tls: Option<TlsAcceptor>) -> Result<Self> {
        let addr = ctx.config.bind_address;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        info!(
            address = %listener.local_addr()?,
            path = %ctx.config.rpc_path,
            tls = tls.is_some(),
            "JSON-RPC server listening"
        );
        Ok(Self { listener, ctx, tls })
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(peer = %peer, "Accepted connection");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let detector = Detector::new(stream, peer, self.ctx.clone(), self.tls.clone());
        tokio::spawn(async move {
            detector.run().await;
        });
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
