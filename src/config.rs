use std::net::SocketAddr;
use std::path::PathBuf;

/// TLS configuration for the API server and clients.
///
/// When enabled, the gRPC API uses mutual TLS (mTLS):
/// - The server presents its certificate and requires a client certificate
/// - Clients present their certificate and verify the server certificate
/// - Both sides must have certificates signed by the same CA
///
/// The subject common name of the client certificate is the caller identity
/// used for authorization.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Enable TLS. If false, all other TLS settings are ignored.
    pub enabled: bool,

    /// Path to the CA certificate (PEM format).
    /// Used to verify peer certificates.
    pub ca_cert_path: Option<PathBuf>,

    /// Path to this side's certificate (PEM format).
    pub cert_path: Option<PathBuf>,

    /// Path to this side's private key (PEM format).
    /// Must match the certificate.
    pub key_path: Option<PathBuf>,

    /// Allow insecure connections for development/testing.
    /// When true and TLS files are missing, runs in plaintext mode with warning.
    /// When false and TLS files are missing, fails to start.
    pub allow_insecure: bool,
}

impl TlsConfig {
    /// Check if TLS is properly configured with all required files.
    pub fn is_complete(&self) -> bool {
        self.enabled
            && self.ca_cert_path.is_some()
            && self.cert_path.is_some()
            && self.key_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Identity assumed for every caller when serving without TLS.
    /// Development only; without it a plaintext server rejects all calls.
    pub insecure_user: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8443)),
            insecure_user: None,
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_insecure_user(mut self, user: impl Into<String>) -> Self {
        self.insecure_user = Some(user.into());
        self
    }
}
