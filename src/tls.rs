//! TLS utilities for loading certificates, configuring mTLS and reading the
//! caller identity out of a verified client certificate.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};
use x509_parser::parse_x509_certificate;

use crate::config::TlsConfig;

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Certificate path not configured")]
    MissingCert,

    #[error("Private key path not configured")]
    MissingKey,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Certificate subject has no common name")]
    MissingCommonName,
}

/// Loaded TLS materials ready for use with tonic.
///
/// Contains both this side's identity (certificate + private key) and the
/// CA certificate used to verify the peer.
#[derive(Clone)]
pub struct TlsIdentity {
    identity: Identity,
    ca_cert: Certificate,
}

impl TlsIdentity {
    /// Load TLS materials from file paths specified in the config.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Any required path is not configured
    /// - Any file does not exist or cannot be read
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert_path = config
            .ca_cert_path
            .as_ref()
            .ok_or(TlsError::MissingCaCert)?;
        let cert_path = config.cert_path.as_ref().ok_or(TlsError::MissingCert)?;
        let key_path = config.key_path.as_ref().ok_or(TlsError::MissingKey)?;

        if !ca_cert_path.exists() {
            return Err(TlsError::CaCertNotFound(ca_cert_path.clone()));
        }
        if !cert_path.exists() {
            return Err(TlsError::CertNotFound(cert_path.clone()));
        }
        if !key_path.exists() {
            return Err(TlsError::KeyNotFound(key_path.clone()));
        }

        let ca_pem = fs::read(ca_cert_path).await?;
        let cert_pem = fs::read(cert_path).await?;
        let key_pem = fs::read(key_path).await?;

        let ca_cert = Certificate::from_pem(ca_pem);
        let identity = Identity::from_pem(cert_pem, key_pem);

        Ok(Self { identity, ca_cert })
    }

    /// Server TLS config that requires and verifies client certificates.
    pub fn server_tls_config(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(self.identity.clone())
            .client_ca_root(self.ca_cert.clone())
    }

    /// Client TLS config presenting this identity and verifying the server
    /// certificate against the CA for `domain_name`.
    pub fn client_tls_config(&self, domain_name: impl Into<String>) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .domain_name(domain_name)
            .ca_certificate(self.ca_cert.clone())
            .identity(self.identity.clone())
    }
}

/// Subject common name of a DER-encoded certificate.
pub fn common_name(der: &[u8]) -> Result<String, TlsError> {
    let (_, cert) =
        parse_x509_certificate(der).map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .ok_or(TlsError::MissingCommonName)?;

    cn.as_str()
        .map(str::to_string)
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_paths() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: None,
            cert_path: None,
            key_path: None,
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::MissingCaCert)));
    }

    #[tokio::test]
    async fn test_load_missing_key_path() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/tmp/ca.crt")),
            cert_path: Some(PathBuf::from("/tmp/client.crt")),
            key_path: None,
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::MissingKey)));
    }

    #[tokio::test]
    async fn test_load_nonexistent_files() {
        let config = TlsConfig {
            enabled: true,
            ca_cert_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            cert_path: Some(PathBuf::from("/nonexistent/server.crt")),
            key_path: Some(PathBuf::from("/nonexistent/server.key")),
            allow_insecure: false,
        };

        let result = TlsIdentity::load(&config).await;
        assert!(matches!(result, Err(TlsError::CaCertNotFound(_))));
    }

    #[test]
    fn test_common_name_rejects_garbage() {
        let result = common_name(b"not a certificate");
        assert!(matches!(result, Err(TlsError::InvalidCertificate(_))));
    }
}
