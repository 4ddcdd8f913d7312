//! Server-side TLS material.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::{Result, ServerError};

/// Certificate chain and key, ready to accept handshakes.
///
/// Cheap to clone; every connection shares the same `rustls::ServerConfig`.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    server_config: Arc<rustls::ServerConfig>,
}

impl TlsConfig {
    /// Load a PEM certificate chain and private key from disk
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let certs = CertificateDer::pem_file_iter(cert_path)
            .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| {
                ServerError::TlsMaterial(format!("{}: {}", cert_path.display(), e))
            })?;
        if certs.is_empty() {
            return Err(ServerError::TlsMaterial(format!(
                "{}: no certificates found",
                cert_path.display()
            )));
        }

        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|e| {
            ServerError::TlsMaterial(format!("{}: {}", key_path.display(), e))
        })?;

        debug!(
            cert = %cert_path.display(),
            chain_len = certs.len(),
            "Loaded TLS certificate chain"
        );
        Self::from_der(certs, key)
    }

    /// Build from DER-encoded certificates and key
    pub fn from_der(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self::from_server_config(Arc::new(config)))
    }

    /// Use a fully custom rustls configuration
    pub fn from_server_config(server_config: Arc<rustls::ServerConfig>) -> Self {
        Self { server_config }
    }

    pub fn server_config(&self) -> &Arc<rustls::ServerConfig> {
        &self.server_config
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.server_config))
    }
}
