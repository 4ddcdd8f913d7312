//! # JSON-RPC over HTTP/1.1
//!
//! Asynchronous transport for [`turul_rpc_core`]. One listening port serves
//! both plaintext HTTP and HTTPS: the first bytes of every connection are
//! inspected and a TLS ClientHello is routed through a rustls handshake,
//! anything else is served as plain HTTP.
//!
//! ## Features
//! - Keep-alive with pipelining and an idle timeout per read
//! - One tokio task per connection, no shared mutable state between them
//! - Dispatcher panics are answered with a JSON-RPC `InternalError`
//!
//! ```no_run
//! use turul_rpc_server::JsonRpcServer;
//!
//! # async fn example() -> turul_rpc_server::Result<()> {
//! let server = JsonRpcServer::builder()
//!     .bind_address("127.0.0.1:8080".parse().unwrap())
//!     .method("add", |a: i64, b: i64| a + b)
//!     .build()?;
//!
//! server.run().await
//! # }
//! ```

pub mod config;
pub mod detect;
pub mod http1;
pub mod listener;
pub mod server;
pub mod session;
pub mod stream;
pub mod tls;

pub use config::ServerConfig;
pub use detect::{Detection, Detector, detect_tls};
pub use listener::Listener;
pub use server::{JsonRpcServer, JsonRpcServerBuilder};
pub use session::{CloseReason, ConnectionContext, Session, SessionState, SessionSummary};
pub use stream::{ByteStream, PlainStream, Rewind, TlsStream, Transport};
pub use tls::TlsConfig;

// Re-export the engine so servers only need one dependency
pub use turul_rpc_core;
pub use turul_rpc_core::JsonRpcDispatcher;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Transport errors surfaced to whoever starts the server.
///
/// Per-connection failures never show up here; they are logged and the
/// connection is dropped.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid TLS material: {0}")]
    TlsMaterial(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
