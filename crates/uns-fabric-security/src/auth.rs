//! Client authentication.
//!
//! Three mechanisms behind one entry point: username/password against a
//! credential table, OAuth2 bearer tokens, and client certificates through
//! the TLS material. A failed check is an error value for the caller to
//! reject the connection with; authentication itself never panics.

use crate::config::{AuthMethod, AuthenticationConfig};
use crate::source::CredentialSource;
use crate::tls::TlsManager;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a connection presented for authentication.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    /// Username from the transport handshake
    pub username: Option<String>,
    /// Password from the transport handshake
    pub password: Option<String>,
    /// Bearer token, when carried outside the password field
    pub token: Option<String>,
    /// Client certificate bytes (PEM or DER)
    pub certificate: Option<Vec<u8>>,
    /// Remote address for log context
    pub remote_addr: Option<String>,
}

impl ConnectionContext {
    /// Context for a username/password connection.
    #[must_use]
    pub fn basic(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Context for a bearer-token connection.
    #[must_use]
    pub fn bearer(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Verifies connection credentials and yields the principal name.
pub struct AuthManager {
    config: AuthenticationConfig,
    tls: Arc<TlsManager>,
    credentials: RwLock<BTreeMap<String, String>>,
}

impl AuthManager {
    /// Create a manager with an empty credential table.
    #[must_use]
    pub fn new(config: AuthenticationConfig, tls: Arc<TlsManager>) -> Self {
        if !config.enabled {
            tracing::warn!("Authentication is disabled; every connection will be accepted");
        }
        if config.enabled
            && config.method == AuthMethod::OAuth2
            && config.oauth.jwt_secret.is_none()
        {
            tracing::warn!(
                "OAuth2 tokens will be accepted without signature verification; \
                 set authentication.oauth.jwtSecret to verify HS256 signatures"
            );
        }
        Self {
            config,
            tls,
            credentials: RwLock::new(BTreeMap::new()),
        }
    }

    /// Whether authentication is enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Configured mechanism.
    #[must_use]
    pub fn method(&self) -> AuthMethod {
        self.config.method
    }

    /// Replace the credential table in one swap.
    pub async fn install_credentials(&self, source: CredentialSource) {
        let table: BTreeMap<String, String> = source
            .users
            .into_iter()
            .map(|credential| (credential.username, credential.password))
            .collect();
        let count = table.len();
        *self.credentials.write().await = table;
        tracing::info!(credentials = count, "Installed credential table");
    }

    /// Verify a connection and return its principal name.
    ///
    /// With authentication disabled every connection is accepted under the
    /// presented username, or `anonymous` when none was given.
    ///
    /// # Errors
    ///
    /// Returns the reason the configured mechanism rejected the connection.
    pub async fn authenticate(&self, context: &ConnectionContext) -> Result<String, AuthError> {
        if !self.config.enabled {
            tracing::warn!(
                remote_addr = context.remote_addr.as_deref().unwrap_or("unknown"),
                "Authentication is disabled; accepting connection unauthenticated"
            );
            return Ok(context
                .username
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()));
        }

        match self.config.method {
            AuthMethod::Basic => self.check_basic(context).await,
            AuthMethod::OAuth2 => self.check_token(context),
            AuthMethod::Certificate => self.check_certificate(context),
        }
    }

    async fn check_basic(&self, context: &ConnectionContext) -> Result<String, AuthError> {
        let username = context
            .username
            .as_deref()
            .ok_or(AuthError::MissingCredentials)?;
        let password = context
            .password
            .as_deref()
            .ok_or(AuthError::MissingCredentials)?;

        let table = self.credentials.read().await;
        match table.get(username) {
            // Unknown user and wrong password are indistinguishable on purpose.
            Some(stored) if stored == password => Ok(username.to_string()),
            _ => Err(AuthError::BadCredentials),
        }
    }

    /// MQTT clients commonly smuggle the token through the password field,
    /// so that is accepted as a fallback.
    fn check_token(&self, context: &ConnectionContext) -> Result<String, AuthError> {
        let token = context
            .token
            .as_deref()
            .or_else(|| context.password.as_deref())
            .ok_or(AuthError::MissingCredentials)?;

        let oauth = &self.config.oauth;
        let (key, mut validation) = match &oauth.jwt_secret {
            Some(secret) => (
                DecodingKey::from_secret(secret.as_bytes()),
                Validation::new(Algorithm::HS256),
            ),
            None => {
                // Reduced-trust mode: issuer, audience and expiry are still
                // checked but the signature is not.
                let mut validation = Validation::new(Algorithm::HS256);
                validation.insecure_disable_signature_validation();
                validation.algorithms = vec![
                    Algorithm::HS256,
                    Algorithm::HS384,
                    Algorithm::HS512,
                    Algorithm::RS256,
                    Algorithm::RS384,
                    Algorithm::RS512,
                    Algorithm::ES256,
                    Algorithm::ES384,
                ];
                (DecodingKey::from_secret(&[]), validation)
            }
        };

        validation.leeway = 0;
        if let Some(issuer) = &oauth.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &oauth.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &key, &validation).map_err(map_jwt_error)?;
        Ok(data.claims.sub)
    }

    fn check_certificate(&self, context: &ConnectionContext) -> Result<String, AuthError> {
        let certificate = context
            .certificate
            .as_deref()
            .ok_or(AuthError::MissingCertificate)?;
        if !self.tls.validate_client_certificate(certificate) {
            return Err(AuthError::CertificateRejected);
        }
        self.tls
            .client_identity(certificate)
            .ok_or(AuthError::CertificateIdentity)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidIssuer => AuthError::ClaimMismatch("iss"),
        ErrorKind::InvalidAudience => AuthError::ClaimMismatch("aud"),
        ErrorKind::InvalidSignature => AuthError::BadSignature,
        _ => AuthError::TokenInvalid(err.to_string()),
    }
}

/// Errors for authentication checks.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The connection carried no usable credentials
    #[error("connection presented no credentials")]
    MissingCredentials,
    /// Username unknown or password wrong
    #[error("unknown user or wrong password")]
    BadCredentials,
    /// Token `exp` lies in the past
    #[error("token is expired")]
    TokenExpired,
    /// Token signature did not verify against the configured secret
    #[error("token signature verification failed")]
    BadSignature,
    /// A required claim does not match the configuration
    #[error("token claim mismatch: {0}")]
    ClaimMismatch(&'static str),
    /// Token malformed or missing required claims
    #[error("token rejected: {0}")]
    TokenInvalid(String),
    /// Certificate method without a client certificate
    #[error("connection presented no client certificate")]
    MissingCertificate,
    /// Certificate unparseable or outside its validity window
    #[error("client certificate rejected")]
    CertificateRejected,
    /// Certificate subject carries no common name
    #[error("client certificate carries no common name")]
    CertificateIdentity,
}
