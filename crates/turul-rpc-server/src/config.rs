//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::{Result, ServerError};

/// Configuration shared (read-only) by the listener and every connection
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_address: SocketAddr,
    /// Path that accepts JSON-RPC POSTs; anything else is a 404
    pub rpc_path: String,
    /// Limit on any single read, write or handshake
    pub idle_timeout: Duration,
    /// Maximum request body size
    pub max_body_size: usize,
    /// Maximum size of a request line plus headers
    pub max_header_size: usize,
    /// Value of the `Server` response header
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            rpc_path: "/".to_string(),
            idle_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,  // 1MB
            max_header_size: 16 * 1024, // 16KB
            server_name: concat!("turul-rpc/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the transport cannot operate with
    pub fn validate(&self) -> Result<()> {
        if !self.rpc_path.starts_with('/') {
            return Err(ServerError::Config(format!(
                "rpc_path must start with '/', got '{}'",
                self.rpc_path
            )));
        }
        if self.idle_timeout.is_zero() {
            return Err(ServerError::Config("idle_timeout must be non-zero".to_string()));
        }
        if self.max_body_size == 0 {
            return Err(ServerError::Config("max_body_size must be non-zero".to_string()));
        }
        if self.max_header_size == 0 {
            return Err(ServerError::Config("max_header_size must be non-zero".to_string()));
        }
        // header values must stay representable on the wire
        if self.server_name.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ServerError::Config("server_name must be a single line".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rpc_path, "/");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert!(config.server_name.starts_with("turul-rpc/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        let config = ServerConfig {
            rpc_path: "rpc".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));

        let config = ServerConfig {
            idle_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            server_name: "evil\r\nX-Injected: 1".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
