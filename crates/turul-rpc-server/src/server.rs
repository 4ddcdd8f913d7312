//! JSON-RPC server façade: configuration, method table and TLS in one place.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::TlsAcceptor;
use tracing::info;
use turul_rpc_core::{Handler, JsonRpcDispatcher};

use crate::config::ServerConfig;
use crate::listener::Listener;
use crate::session::ConnectionContext;
use crate::tls::TlsConfig;
use crate::Result;

/// Builder for [`JsonRpcServer`]
#[derive(Debug, Default)]
pub struct JsonRpcServerBuilder {
    config: ServerConfig,
    dispatcher: JsonRpcDispatcher,
    tls: Option<TlsConfig>,
}

impl JsonRpcServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.config.bind_address = addr;
        self
    }

    /// Set the JSON-RPC endpoint path
    pub fn rpc_path(mut self, path: impl Into<String>) -> Self {
        self.config.rpc_path = path.into();
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set maximum request body size
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.config.max_header_size = size;
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    /// Serve HTTPS alongside plaintext HTTP on the same port
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Register a method. A later registration under the same name wins.
    pub fn method<H, Args>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: 'static,
    {
        self.dispatcher.add_method(name, handler);
        self
    }

    /// Use a pre-built method table, replacing anything registered so far
    pub fn dispatcher(mut self, dispatcher: JsonRpcDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Validate the configuration and freeze the method table
    pub fn build(self) -> Result<JsonRpcServer> {
        self.config.validate()?;
        Ok(JsonRpcServer {
            config: Arc::new(self.config),
            dispatcher: Arc::new(self.dispatcher),
            tls: self.tls.as_ref().map(TlsConfig::acceptor),
        })
    }
}

/// A configured server, ready to bind
#[derive(Clone)]
pub struct JsonRpcServer {
    config: Arc<ServerConfig>,
    dispatcher: Arc<JsonRpcDispatcher>,
    tls: Option<TlsAcceptor>,
}

impl JsonRpcServer {
    pub fn builder() -> JsonRpcServerBuilder {
        JsonRpcServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<JsonRpcDispatcher> {
        &self.dispatcher
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Bind the listening socket without accepting yet
    pub async fn bind(&self) -> Result<Listener> {
        let ctx = ConnectionContext::new(Arc::clone(&self.config), Arc::clone(&self.dispatcher));
        Listener::bind(ctx, self.tls.clone()).await
    }

    /// Bind and serve forever
    pub async fn run(&self) -> Result<()> {
        self.bind().await?.run().await;
        Ok(())
    }

    /// Bind and serve until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.bind().await?.run_until(shutdown).await;
        info!("JSON-RPC server stopped");
        Ok(())
    }
}

impl std::fmt::Debug for JsonRpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcServer")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}
