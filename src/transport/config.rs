//! TLS configuration for server listeners and client connections.
//!
//! Handles certificate management and development vs production TLS setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{Certificate, CertificateParams};

use crate::error::{EppError, Result};

/// Certificate configuration source.
#[derive(Debug, Clone)]
pub enum CertConfig {
    /// Generate a self-signed certificate on load (development only).
    SelfSigned {
        /// Common name for the certificate.
        common_name: String,
    },
    /// Load certificates from files.
    Files {
        /// Path to PEM certificate file.
        cert_path: PathBuf,
        /// Path to PEM private key file.
        key_path: PathBuf,
    },
    /// Use raw certificate data.
    Raw {
        /// DER-encoded certificate chain.
        cert_der: Vec<Vec<u8>>,
        /// DER-encoded private key (PKCS8).
        key_der: Vec<u8>,
    },
}

impl Default for CertConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl CertConfig {
    /// Development configuration with a self-signed cert for `localhost`.
    pub fn development() -> Self {
        Self::SelfSigned {
            common_name: "localhost".to_string(),
        }
    }

    /// Production configuration from PEM files.
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::Files {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Generate a self-signed certificate now and keep it as raw DER.
    ///
    /// Unlike [`CertConfig::SelfSigned`], the certificate is fixed, so a
    /// client can be told to trust it.
    pub fn generate(common_name: &str) -> Result<Self> {
        let (cert_der, key_der) = self_signed(common_name)?;
        Ok(Self::Raw {
            cert_der: vec![cert_der],
            key_der,
        })
    }

    /// First certificate of the chain in DER, when already materialized.
    pub fn leaf_der(&self) -> Option<&[u8]> {
        match self {
            Self::Raw { cert_der, .. } => cert_der.first().map(Vec::as_slice),
            _ => None,
        }
    }

    /// Load the certificate chain and private key.
    pub fn load(&self) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
        match self {
            Self::SelfSigned { common_name } => {
                tracing::warn!(
                    "Using self-signed certificate for '{}' - NOT FOR PRODUCTION",
                    common_name
                );
                let (cert_der, key_der) = self_signed(common_name)?;
                Ok((vec![rustls::Certificate(cert_der)], rustls::PrivateKey(key_der)))
            },
            Self::Files {
                cert_path,
                key_path,
            } => {
                let certs = load_pem_certs(cert_path)?;
                let key_pem = fs::read(key_path).map_err(|e| {
                    EppError::Config(format!("Failed to read key file {:?}: {}", key_path, e))
                })?;

                // Try PKCS8 first, then RSA
                let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())
                    .map_err(|e| EppError::Config(format!("Failed to parse key PEM: {}", e)))?
                    .into_iter()
                    .next()
                    .map(rustls::PrivateKey)
                    .or_else(|| {
                        rustls_pemfile::rsa_private_keys(&mut key_pem.as_slice())
                            .ok()?
                            .into_iter()
                            .next()
                            .map(rustls::PrivateKey)
                    })
                    .ok_or_else(|| {
                        EppError::Config("No private key found in PEM file".to_string())
                    })?;

                Ok((certs, key))
            },
            Self::Raw { cert_der, key_der } => {
                let certs = cert_der
                    .iter()
                    .map(|c| rustls::Certificate(c.clone()))
                    .collect();
                Ok((certs, rustls::PrivateKey(key_der.clone())))
            },
        }
    }
}

fn self_signed(common_name: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut params = CertificateParams::new(vec![
        common_name.to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ]);
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, common_name.to_string());

    let cert = Certificate::from_params(params)
        .map_err(|e| EppError::Config(format!("Failed to generate self-signed cert: {}", e)))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| EppError::Config(format!("Failed to serialize cert: {}", e)))?;
    Ok((cert_der, cert.serialize_private_key_der()))
}

fn load_pem_certs(path: &Path) -> Result<Vec<rustls::Certificate>> {
    let pem = fs::read(path)
        .map_err(|e| EppError::Config(format!("Failed to read cert file {:?}: {}", path, e)))?;
    let certs: Vec<rustls::Certificate> = rustls_pemfile::certs(&mut pem.as_slice())
        .map_err(|e| EppError::Config(format!("Failed to parse cert PEM: {}", e)))?
        .into_iter()
        .map(rustls::Certificate)
        .collect();
    if certs.is_empty() {
        return Err(EppError::Config(format!("No certificates found in {:?}", path)));
    }
    Ok(certs)
}

/// Server-side TLS configuration.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Certificate source.
    pub cert: CertConfig,
}

impl TlsConfig {
    /// Development TLS config with a self-signed cert.
    pub fn development() -> Self {
        Self {
            cert: CertConfig::development(),
        }
    }

    /// Production TLS config from certificate files.
    pub fn production(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert: CertConfig::from_files(cert_path, key_path),
        }
    }

    /// TLS config for an explicit certificate source.
    pub fn with_cert(cert: CertConfig) -> Self {
        Self { cert }
    }

    /// Build the rustls server configuration.
    pub fn build_server_config(&self) -> Result<Arc<rustls::ServerConfig>> {
        let (certs, key) = self.cert.load()?;
        let config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| EppError::Tls(format!("Failed to build TLS config: {}", e)))?;
        Ok(Arc::new(config))
    }
}

/// Trust anchors for verifying the server.
#[derive(Debug, Clone)]
pub enum RootSource {
    /// PEM bundle on disk.
    File(PathBuf),
    /// DER-encoded certificates.
    Der(Vec<Vec<u8>>),
}

/// Client-side TLS configuration.
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
    /// Certificates the server chain must lead to.
    pub roots: RootSource,
    /// Client certificate for mutual TLS.
    pub identity: Option<CertConfig>,
    /// Name to verify instead of the connection host.
    pub server_name: Option<String>,
}

impl ClientTlsConfig {
    /// Trust the CA bundle at `path`.
    pub fn from_ca_file(path: impl Into<PathBuf>) -> Self {
        Self {
            roots: RootSource::File(path.into()),
            identity: None,
            server_name: None,
        }
    }

    /// Trust exactly this DER certificate.
    pub fn trusting(cert_der: Vec<u8>) -> Self {
        Self {
            roots: RootSource::Der(vec![cert_der]),
            identity: None,
            server_name: None,
        }
    }

    /// Present a client certificate.
    pub fn with_identity(mut self, identity: CertConfig) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Verify the server against this name.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Build the rustls client configuration.
    pub fn build_client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let anchors = match &self.roots {
            RootSource::File(path) => load_pem_certs(path)?,
            RootSource::Der(ders) => ders.iter().cloned().map(rustls::Certificate).collect(),
        };

        let mut roots = rustls::RootCertStore::empty();
        for anchor in &anchors {
            roots
                .add(anchor)
                .map_err(|e| EppError::Tls(format!("Invalid trust anchor: {}", e)))?;
        }

        let builder = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots);
        let config = match &self.identity {
            Some(identity) => {
                let (certs, key) = identity.load()?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| EppError::Tls(format!("Invalid client certificate: {}", e)))?
            },
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_config_self_signed() {
        let (certs, _key) = CertConfig::development().load().unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_generated_cert_is_stable() {
        let cert = CertConfig::generate("localhost").unwrap();
        let leaf = cert.leaf_der().unwrap().to_vec();
        let (certs, _key) = cert.load().unwrap();
        assert_eq!(certs[0].0, leaf);
    }

    #[test]
    fn test_tls_configs_build() {
        let cert = CertConfig::generate("localhost").unwrap();
        let leaf = cert.leaf_der().unwrap().to_vec();

        assert!(TlsConfig::with_cert(cert).build_server_config().is_ok());
        assert!(ClientTlsConfig::trusting(leaf)
            .with_server_name("localhost")
            .build_client_config()
            .is_ok());
    }

    #[test]
    fn test_missing_files_are_config_errors() {
        let cert = CertConfig::from_files("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(cert.load(), Err(EppError::Config(_))));

        let client = ClientTlsConfig::from_ca_file("/nonexistent/ca.pem");
        assert!(matches!(client.build_client_config(), Err(EppError::Config(_))));
    }
}
