//! Security configuration.
//!
//! The whole block is usually loaded from one JSON document; every field has
//! a default so partial documents work.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level security configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Master switch; disabled short-circuits every check to allow
    pub enabled: bool,
    /// Authentication settings
    pub authentication: AuthenticationConfig,
    /// Authorization settings
    pub authorization: AuthorizationConfig,
    /// TLS material
    pub tls: TlsConfig,
    /// Record audit events
    pub audit_log: bool,
    /// Audit ring-buffer size
    pub audit_capacity: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            authentication: AuthenticationConfig::default(),
            authorization: AuthorizationConfig::default(),
            tls: TlsConfig::default(),
            audit_log: true,
            audit_capacity: 1000,
        }
    }
}

impl SecurityConfig {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns error for combinations that cannot work at runtime, such as
    /// certificate authentication without TLS.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled
            && self.authentication.enabled
            && self.authentication.method == AuthMethod::Certificate
            && !self.tls.enabled
        {
            return Err(ConfigError::Invalid(
                "certificate authentication requires tls.enabled".to_string(),
            ));
        }
        if self.audit_capacity == 0 {
            return Err(ConfigError::Invalid(
                "auditCapacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthenticationConfig {
    /// Authenticate connections at all
    pub enabled: bool,
    /// Active strategy
    pub method: AuthMethod,
    /// OAuth2 settings (used by the `oauth2` method)
    pub oauth: OAuthConfig,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: AuthMethod::Basic,
            oauth: OAuthConfig::default(),
        }
    }
}

/// Authentication strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Username/password against the credential table
    Basic,
    /// Bearer-token claims check
    OAuth2,
    /// Client certificate via the TLS manager
    Certificate,
}

/// OAuth2 bearer-token settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Expected `iss` claim; unchecked when absent
    pub issuer: Option<String>,
    /// Expected `aud` claim; unchecked when absent
    pub audience: Option<String>,
    /// HMAC secret; when set, token signatures are fully verified
    pub jwt_secret: Option<String>,
}

/// Authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorizationConfig {
    /// Evaluate ACLs at all
    pub enabled: bool,
    /// Decision for principals with no ACL entry
    pub default_policy: DefaultPolicy,
    /// Principals that bypass every check
    pub admin_users: Vec<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_policy: DefaultPolicy::Deny,
            admin_users: Vec::new(),
        }
    }
}

/// Decision applied to principals without an ACL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    /// Allow unknown principals
    Allow,
    /// Deny unknown principals
    Deny,
}

/// TLS material configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsConfig {
    /// Serve TLS listeners
    pub enabled: bool,
    /// Server certificate chain (PEM)
    pub cert_path: Option<PathBuf>,
    /// Server private key (PEM)
    pub key_path: Option<PathBuf>,
    /// CA bundle for client verification (PEM, optional)
    pub ca_path: Option<PathBuf>,
    /// Request and verify client certificates (mutual TLS)
    pub require_client_cert: bool,
    /// Advisory cipher-suite names passed to transports that honour them
    pub cipher_suites: Vec<String>,
}

/// Errors for security configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to load security config: {0}")]
    Io(String),
    /// Document rejected
    #[error("security config error: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_enabled_and_deny() {
        let config = SecurityConfig::default();
        assert!(config.enabled);
        assert!(config.authentication.enabled);
        assert_eq!(config.authentication.method, AuthMethod::Basic);
        assert_eq!(
            config.authorization.default_policy,
            DefaultPolicy::Deny
        );
        assert_eq!(config.audit_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_document_fills_defaults() {
        let config: SecurityConfig = serde_json::from_str(
            r#"{
                "authentication": { "method": "oauth2", "oauth": { "issuer": "https://idp.example" } },
                "authorization": { "defaultPolicy": "allow", "adminUsers": ["root"] }
            }"#,
        )
        .unwrap();

        assert_eq!(config.authentication.method, AuthMethod::OAuth2);
        assert_eq!(
            config.authentication.oauth.issuer.as_deref(),
            Some("https://idp.example")
        );
        assert_eq!(config.authorization.default_policy, DefaultPolicy::Allow);
        assert_eq!(config.authorization.admin_users, vec!["root".to_string()]);
        assert!(config.audit_log);
    }

    #[test]
    fn certificate_method_requires_tls() {
        let config: SecurityConfig = serde_json::from_str(
            r#"{ "authentication": { "method": "certificate" } }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("security.json");
        std::fs::write(&path, r#"{ "enabled": false }"#).unwrap();

        let config = SecurityConfig::from_file(&path).unwrap();
        assert!(!config.enabled);

        std::fs::write(&path, b"{ corrupted").unwrap();
        assert!(SecurityConfig::from_file(&path).is_err());
    }
}
