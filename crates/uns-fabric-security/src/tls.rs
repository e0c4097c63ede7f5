//! TLS material handling.
//!
//! Loads the server identity (certificate, key, optional CA bundle) at
//! startup and answers client-certificate validity checks. Chain-of-trust
//! verification stays with the transport; this module only vouches for the
//! material being present, parseable, and inside its validity window.

use crate::config::TlsConfig;
use serde::Serialize;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use x509_parser::prelude::*;

/// Summary of one parsed certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateSummary {
    /// Distinguished subject name
    pub subject: String,
    /// Distinguished issuer name
    pub issuer: String,
    /// Validity start (unix seconds)
    pub not_before: i64,
    /// Validity end (unix seconds)
    pub not_after: i64,
}

impl CertificateSummary {
    /// Whether the certificate is valid at the given unix timestamp.
    #[must_use]
    pub fn valid_at(&self, unix_seconds: i64) -> bool {
        self.not_before <= unix_seconds && unix_seconds <= self.not_after
    }
}

/// Listener-facing view of the loaded material.
#[derive(Debug, Clone)]
pub struct TlsServerOptions {
    /// Server certificate chain (PEM)
    pub cert_path: PathBuf,
    /// Server private key (PEM)
    pub key_path: PathBuf,
    /// CA bundle for client verification
    pub ca_path: Option<PathBuf>,
    /// Request and verify client certificates
    pub require_client_cert: bool,
}

struct ServerIdentity {
    cert_path: PathBuf,
    key_path: PathBuf,
    leaf: CertificateSummary,
}

/// Loads and answers for TLS material.
pub struct TlsManager {
    config: TlsConfig,
    identity: Option<ServerIdentity>,
}

impl TlsManager {
    /// Load material per configuration.
    ///
    /// With TLS disabled this succeeds without touching the filesystem.
    ///
    /// # Errors
    ///
    /// Returns error when TLS is enabled and the key or certificate is
    /// missing or unparseable; intended to abort startup.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        if !config.enabled {
            return Ok(Self {
                config,
                identity: None,
            });
        }

        let cert_path = config
            .cert_path
            .clone()
            .ok_or(TlsError::MissingMaterial("certPath"))?;
        let key_path = config
            .key_path
            .clone()
            .ok_or(TlsError::MissingMaterial("keyPath"))?;

        let leaf_der = read_first_certificate(&cert_path)?;
        let leaf = summarize(&leaf_der)?;
        ensure_private_key(&key_path)?;
        if let Some(ca_path) = &config.ca_path {
            read_first_certificate(ca_path)?;
        }

        if !config.cipher_suites.is_empty() {
            tracing::debug!(cipher_suites = ?config.cipher_suites, "Configured cipher suites");
        }
        tracing::info!(
            subject = %leaf.subject,
            not_after = leaf.not_after,
            "Loaded TLS server identity"
        );

        Ok(Self {
            config,
            identity: Some(ServerIdentity {
                cert_path,
                key_path,
                leaf,
            }),
        })
    }

    /// Whether TLS is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Whether listeners must request and verify client certificates.
    #[must_use]
    pub fn require_client_cert(&self) -> bool {
        self.config.require_client_cert
    }

    /// Summary of the loaded server certificate.
    #[must_use]
    pub fn certificate_summary(&self) -> Option<&CertificateSummary> {
        self.identity.as_ref().map(|identity| &identity.leaf)
    }

    /// Paths and flags for a TLS listener; `None` while TLS is disabled.
    #[must_use]
    pub fn server_options(&self) -> Option<TlsServerOptions> {
        let identity = self.identity.as_ref()?;
        Some(TlsServerOptions {
            cert_path: identity.cert_path.clone(),
            key_path: identity.key_path.clone(),
            ca_path: self.config.ca_path.clone(),
            require_client_cert: self.config.require_client_cert,
        })
    }

    /// Check a client certificate's validity window against the clock.
    ///
    /// Accepts PEM or DER bytes. Unparseable input is invalid, never an
    /// error.
    #[must_use]
    pub fn validate_client_certificate(&self, certificate: &[u8]) -> bool {
        let Some(der) = certificate_der(certificate) else {
            return false;
        };
        match summarize(&der) {
            Ok(summary) => {
                let now = chrono::Utc::now().timestamp();
                let valid = summary.valid_at(now);
                if !valid {
                    tracing::warn!(
                        subject = %summary.subject,
                        not_before = summary.not_before,
                        not_after = summary.not_after,
                        "Client certificate outside validity window"
                    );
                }
                valid
            }
            Err(err) => {
                tracing::warn!(error = %err, "Client certificate failed to parse");
                false
            }
        }
    }

    /// Extract the subject common name from a client certificate.
    #[must_use]
    pub fn client_identity(&self, certificate: &[u8]) -> Option<String> {
        let der = certificate_der(certificate)?;
        let (_, cert) = X509Certificate::from_der(&der).ok()?;
        let identity = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(ToString::to_string);
        identity
    }
}

/// Normalize PEM or DER input to DER bytes.
fn certificate_der(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.starts_with(b"-----BEGIN") {
        let mut reader = BufReader::new(bytes);
        let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
        return certs.ok()?.first().map(|cert| cert.to_vec());
    }
    Some(bytes.to_vec())
}

fn read_first_certificate(path: &Path) -> Result<Vec<u8>, TlsError> {
    let bytes = std::fs::read(path).map_err(|e| TlsError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(bytes.as_slice());
    let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs.map_err(|e| TlsError::Parse(format!("{}: {e}", path.display())))?;

    certs
        .first()
        .map(|cert| cert.to_vec())
        .ok_or_else(|| TlsError::NoCertificate(path.display().to_string()))
}

fn ensure_private_key(path: &Path) -> Result<(), TlsError> {
    let bytes = std::fs::read(path).map_err(|e| TlsError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(bytes.as_slice());
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Parse(format!("{}: {e}", path.display())))?;

    if key.is_none() {
        return Err(TlsError::NoPrivateKey(path.display().to_string()));
    }
    Ok(())
}

fn summarize(der: &[u8]) -> Result<CertificateSummary, TlsError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| TlsError::Parse(e.to_string()))?;
    Ok(CertificateSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_before: cert.validity().not_before.timestamp(),
        not_after: cert.validity().not_after.timestamp(),
    })
}

/// Errors for TLS material handling.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TlsError {
    /// A required path is absent from the configuration
    #[error("TLS is enabled but {0} is not configured")]
    MissingMaterial(&'static str),
    /// File could not be read
    #[error("failed to read {path}: {message}")]
    Io {
        /// Offending path
        path: String,
        /// Underlying message
        message: String,
    },
    /// File held no certificate
    #[error("no certificate found in {0}")]
    NoCertificate(String),
    /// File held no private key
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    /// Material failed to parse
    #[error("certificate parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{Certificate as RcCert, CertificateParams, DistinguishedName, DnType};
    use std::path::PathBuf;

    fn self_signed(common_name: &str) -> RcCert {
        let mut params = CertificateParams::new(vec![common_name.to_string()]);
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        RcCert::from_params(params).unwrap()
    }

    fn expired_cert() -> RcCert {
        let mut params = CertificateParams::new(vec!["expired".to_string()]);
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "expired");
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        RcCert::from_params(params).unwrap()
    }

    fn enabled_config(cert_path: PathBuf, key_path: PathBuf) -> TlsConfig {
        TlsConfig {
            enabled: true,
            cert_path: Some(cert_path),
            key_path: Some(key_path),
            ..TlsConfig::default()
        }
    }

    #[test]
    fn disabled_tls_needs_no_material() {
        let manager = TlsManager::new(TlsConfig::default()).unwrap();
        assert!(!manager.enabled());
        assert!(manager.server_options().is_none());
    }

    #[test]
    fn enabled_tls_without_paths_is_fatal() {
        let result = TlsManager::new(TlsConfig {
            enabled: true,
            ..TlsConfig::default()
        });
        assert!(matches!(result, Err(TlsError::MissingMaterial("certPath"))));

        let result = TlsManager::new(TlsConfig {
            enabled: true,
            cert_path: Some(PathBuf::from("/tmp/server.pem")),
            ..TlsConfig::default()
        });
        assert!(matches!(result, Err(TlsError::MissingMaterial("keyPath"))));
    }

    #[test]
    fn missing_files_are_fatal() {
        let result = TlsManager::new(enabled_config(
            PathBuf::from("/nonexistent/server.pem"),
            PathBuf::from("/nonexistent/server.key"),
        ));
        assert!(matches!(result, Err(TlsError::Io { .. })));
    }

    #[test]
    fn loads_generated_identity() {
        let dir = tempfile::tempdir().unwrap();
        let cert = self_signed("broker.uns.local");
        let cert_path = dir.path().join("server.pem");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, cert.serialize_pem().unwrap()).unwrap();
        std::fs::write(&key_path, cert.serialize_private_key_pem()).unwrap();

        let mut config = enabled_config(cert_path.clone(), key_path.clone());
        config.require_client_cert = true;

        let manager = TlsManager::new(config).unwrap();
        let summary = manager.certificate_summary().unwrap();
        assert!(summary.subject.contains("broker.uns.local"));

        let options = manager.server_options().unwrap();
        assert_eq!(options.cert_path, cert_path);
        assert_eq!(options.key_path, key_path);
        assert!(options.require_client_cert);
        assert!(options.ca_path.is_none());
    }

    #[test]
    fn file_without_certificate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("server.pem");
        let key_path = dir.path().join("server.key");
        std::fs::write(&cert_path, b"no pem blocks here").unwrap();
        std::fs::write(&key_path, b"none either").unwrap();

        let result = TlsManager::new(enabled_config(cert_path, key_path));
        assert!(matches!(result, Err(TlsError::NoCertificate(_))));
    }

    #[test]
    fn client_certificate_window_check() {
        let manager = TlsManager::new(TlsConfig::default()).unwrap();

        let current = self_signed("client1");
        assert!(manager.validate_client_certificate(&current.serialize_der().unwrap()));
        assert!(manager.validate_client_certificate(current.serialize_pem().unwrap().as_bytes()));

        let expired = expired_cert();
        assert!(!manager.validate_client_certificate(&expired.serialize_der().unwrap()));
    }

    #[test]
    fn garbage_certificates_are_invalid_not_fatal() {
        let manager = TlsManager::new(TlsConfig::default()).unwrap();
        assert!(!manager.validate_client_certificate(b"definitely not a certificate"));
        assert!(!manager.validate_client_certificate(b"-----BEGIN CERTIFICATE-----\ngarbage\n-----END CERTIFICATE-----\n"));
    }

    #[test]
    fn extracts_common_name() {
        let manager = TlsManager::new(TlsConfig::default()).unwrap();
        let cert = self_signed("press-17");
        let identity = manager.client_identity(&cert.serialize_der().unwrap());
        assert_eq!(identity.as_deref(), Some("press-17"));
    }

    #[test]
    fn validity_window_math() {
        let summary = CertificateSummary {
            subject: "CN=test".to_string(),
            issuer: "CN=test".to_string(),
            not_before: 1_000,
            not_after: 2_000,
        };
        assert!(!summary.valid_at(999));
        assert!(summary.valid_at(1_000));
        assert!(summary.valid_at(1_500));
        assert!(summary.valid_at(2_000));
        assert!(!summary.valid_at(2_001));
    }
}
