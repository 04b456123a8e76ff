//! TLS material and rustls configuration.
//!
//! # Example
//!
//! ```no_run
//! use nsocket::TlsConfig;
//!
//! let server = TlsConfig::new()
//!     .cert_chain_file("certs/server.pem")
//!     .private_key_file("certs/server.key.pem")
//!     .trust_roots_file("certs/ca.pem")
//!     .require_client_auth(true);
//!
//! let client = TlsConfig::new()
//!     .cert_chain_file("certs/client.pem")
//!     .private_key_file("certs/client.key.pem")
//!     .trust_roots_file("certs/ca.pem")
//!     .server_name("localhost");
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConnection, RootCertStore, ServerConnection};

use super::{PlainTransport, TlsTransport};
use crate::error::{Result, SocketError};

/// Where PEM data comes from.
#[derive(Debug, Clone)]
pub enum PemSource {
    /// A file on disk.
    File(PathBuf),
    /// PEM text held in memory.
    Bytes(Vec<u8>),
}

impl fmt::Display for PemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PemSource::File(path) => write!(f, "{}", path.display()),
            PemSource::Bytes(bytes) => write!(f, "<{} bytes of PEM>", bytes.len()),
        }
    }
}

/// TLS settings for one endpoint.
///
/// A server needs a certificate chain and key; a client needs trust roots and,
/// when the server asks for one, its own certificate and key.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Own certificate chain, leaf first.
    pub cert_chain: Option<PemSource>,
    /// Private key for the leaf certificate.
    pub private_key: Option<PemSource>,
    /// CA certificates used to verify the peer.
    pub trust_roots: Option<PemSource>,
    /// Server only: reject clients without a valid certificate.
    pub require_client_auth: bool,
    /// Client only: name the server certificate must match.
    pub server_name: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_chain: None,
            private_key: None,
            trust_roots: None,
            require_client_auth: false,
            server_name: "localhost".to_string(),
        }
    }
}

impl TlsConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the certificate chain from a PEM file.
    pub fn cert_chain_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_chain = Some(PemSource::File(path.into()));
        self
    }

    /// Use an in-memory PEM certificate chain.
    pub fn cert_chain_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.cert_chain = Some(PemSource::Bytes(pem.into()));
        self
    }

    /// Load the private key from a PEM file.
    pub fn private_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(PemSource::File(path.into()));
        self
    }

    /// Use an in-memory PEM private key.
    pub fn private_key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.private_key = Some(PemSource::Bytes(pem.into()));
        self
    }

    /// Load trusted CA certificates from a PEM file.
    pub fn trust_roots_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.trust_roots = Some(PemSource::File(path.into()));
        self
    }

    /// Use in-memory PEM CA certificates.
    pub fn trust_roots_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.trust_roots = Some(PemSource::Bytes(pem.into()));
        self
    }

    /// Require clients to present a certificate signed by the trust roots.
    pub fn require_client_auth(mut self, required: bool) -> Self {
        self.require_client_auth = required;
        self
    }

    /// Name the server certificate must be valid for.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }
}

fn load_certs(source: &PemSource) -> Result<Vec<CertificateDer<'static>>> {
    let certs = match source {
        PemSource::File(path) => CertificateDer::pem_file_iter(path)
            .map_err(|e| SocketError::TlsConfig(format!("cannot read {}: {:?}", source, e)))?
            .collect::<std::result::Result<Vec<_>, _>>(),
        PemSource::Bytes(bytes) => {
            CertificateDer::pem_slice_iter(bytes).collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| SocketError::TlsConfig(format!("invalid certificate in {}: {:?}", source, e)))?;

    if certs.is_empty() {
        return Err(SocketError::TlsConfig(format!("no certificate found in {}", source)));
    }
    Ok(certs)
}

fn load_key(source: &PemSource) -> Result<PrivateKeyDer<'static>> {
    match source {
        PemSource::File(path) => PrivateKeyDer::from_pem_file(path),
        PemSource::Bytes(bytes) => PrivateKeyDer::from_pem_slice(bytes),
    }
    .map_err(|e| SocketError::TlsConfig(format!("invalid private key in {}: {:?}", source, e)))
}

fn load_roots(source: &PemSource) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(source)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

fn required<'a>(source: &'a Option<PemSource>, what: &str) -> Result<&'a PemSource> {
    source
        .as_ref()
        .ok_or_else(|| SocketError::TlsConfig(format!("{} is required", what)))
}

/// Built rustls configuration for one side.
#[derive(Clone)]
pub(crate) enum TlsContext {
    Server(Arc<rustls::ServerConfig>),
    Client {
        config: Arc<rustls::ClientConfig>,
        server_name: ServerName<'static>,
    },
}

impl TlsContext {
    pub(crate) fn server(config: &TlsConfig) -> Result<Self> {
        let certs = load_certs(required(&config.cert_chain, "server certificate chain")?)?;
        let key = load_key(required(&config.private_key, "server private key")?)?;
        let provider: Arc<CryptoProvider> = Arc::new(default_provider());

        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;
        let builder = if config.require_client_auth {
            let roots = load_roots(required(&config.trust_roots, "trust roots for client auth")?)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .build()
                .map_err(|e| SocketError::TlsConfig(format!("client verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        Ok(Self::Server(Arc::new(builder.with_single_cert(certs, key)?)))
    }

    pub(crate) fn client(config: &TlsConfig) -> Result<Self> {
        let roots = load_roots(required(&config.trust_roots, "trust roots")?)?;
        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);

        let client_config = match (&config.cert_chain, &config.private_key) {
            (Some(chain), Some(key)) => builder.with_client_auth_cert(load_certs(chain)?, load_key(key)?)?,
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(SocketError::TlsConfig(
                    "client certificate and private key must be given together".to_string(),
                ))
            }
        };

        let server_name = ServerName::try_from(config.server_name.clone()).map_err(|e| {
            SocketError::TlsConfig(format!("invalid server name '{}': {}", config.server_name, e))
        })?;

        Ok(Self::Client {
            config: Arc::new(client_config),
            server_name,
        })
    }

    /// Start a session over `inner`.
    pub(crate) fn wrap(&self, inner: PlainTransport) -> Result<TlsTransport> {
        match self {
            TlsContext::Server(config) => Ok(TlsTransport::server(
                inner,
                ServerConnection::new(config.clone())?,
            )),
            TlsContext::Client {
                config,
                server_name,
            } => Ok(TlsTransport::client(
                inner,
                ClientConnection::new(config.clone(), server_name.clone())?,
            )),
        }
    }
}
