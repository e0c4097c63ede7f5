//! Security facade.
//!
//! Composes authentication, authorization, TLS material and the audit log
//! behind one handle. Every decision-making call appends exactly one audit
//! event, subject to the `auditLog` switch. The top-level `enabled` flag
//! short-circuits all checks to allow.

use crate::audit::{AuditEvent, AuditKind, AuditLog};
use crate::auth::{AuthError, AuthManager, ConnectionContext};
use crate::authz::{AuthorizationManager, TopicAction, UserEntry, UserPermissions};
use crate::config::{AuthMethod, ConfigError, SecurityConfig};
use crate::source::{AclSource, CredentialSource, SourceError};
use crate::tls::{TlsError, TlsManager};
use std::path::PathBuf;
use std::sync::Arc;
use uns_fabric_core::TopicValidator;

/// Filesystem locations of the reloadable security tables.
#[derive(Debug, Clone, Default)]
pub struct SourcePaths {
    /// Credential table for basic authentication
    pub credentials: Option<PathBuf>,
    /// Roles and users for authorization
    pub acl: Option<PathBuf>,
}

/// One handle over the whole security subsystem.
pub struct SecurityManager {
    config: SecurityConfig,
    sources: SourcePaths,
    tls: Arc<TlsManager>,
    auth: AuthManager,
    authz: AuthorizationManager,
    audit: AuditLog,
}

impl SecurityManager {
    /// Build the subsystem and load the initial tables.
    ///
    /// # Errors
    ///
    /// Returns error when the configuration is inconsistent, TLS material
    /// cannot be loaded, or a configured source file fails to parse.
    pub async fn new(
        config: SecurityConfig,
        sources: SourcePaths,
        topics: TopicValidator,
    ) -> Result<Self, SecurityError> {
        config.validate()?;
        if !config.enabled {
            tracing::warn!("Security is DISABLED; every connection and operation will be allowed");
        }

        let tls = Arc::new(TlsManager::new(config.tls.clone())?);
        let auth = AuthManager::new(config.authentication.clone(), Arc::clone(&tls));
        let authz = AuthorizationManager::new(config.authorization.clone(), topics);
        let audit = AuditLog::new(config.audit_capacity);

        let manager = Self {
            config,
            sources,
            tls,
            auth,
            authz,
            audit,
        };
        manager.load_sources().await?;
        Ok(manager)
    }

    async fn load_sources(&self) -> Result<(), SecurityError> {
        if let Some(path) = &self.sources.credentials {
            self.auth
                .install_credentials(CredentialSource::from_file(path)?)
                .await;
        }
        if let Some(path) = &self.sources.acl {
            self.authz.install(AclSource::from_file(path)?).await;
        }
        Ok(())
    }

    /// Whether security checks are enabled at the top level.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Configured authentication mechanism.
    #[must_use]
    pub fn authentication_method(&self) -> AuthMethod {
        self.auth.method()
    }

    /// TLS material handle for listeners.
    #[must_use]
    pub fn tls(&self) -> &TlsManager {
        &self.tls
    }

    /// Authenticate a connection and return its principal name.
    ///
    /// # Errors
    ///
    /// Returns the mechanism-specific rejection; with security disabled this
    /// always succeeds.
    pub async fn authenticate_client(
        &self,
        context: &ConnectionContext,
    ) -> Result<String, AuthError> {
        if !self.config.enabled {
            let principal = context
                .username
                .clone()
                .unwrap_or_else(|| "anonymous".to_string());
            self.record(
                AuditEvent::new(AuditKind::Authentication, true, "security disabled")
                    .with_principal(&principal),
            )
            .await;
            return Ok(principal);
        }

        let result = self.auth.authenticate(context).await;
        let mut event = match &result {
            Ok(principal) => {
                AuditEvent::new(AuditKind::Authentication, true, "authenticated")
                    .with_principal(principal)
            }
            Err(err) => {
                let event = AuditEvent::new(AuditKind::Authentication, false, err.to_string());
                match context.username.as_deref() {
                    Some(username) => event.with_principal(username),
                    None => event,
                }
            }
        };
        if let Some(remote) = &context.remote_addr {
            event = event.with_source(remote);
        }
        self.record(event).await;
        result
    }

    /// Whether `principal` may perform `action` on `topic`.
    pub async fn authorize_client(
        &self,
        principal: &str,
        topic: &str,
        action: TopicAction,
    ) -> bool {
        let (allowed, detail) = if self.config.enabled {
            let allowed = self.authz.authorize(principal, topic, action).await;
            (allowed, if allowed { "granted" } else { "denied" })
        } else {
            (true, "security disabled")
        };

        self.record(
            AuditEvent::new(AuditKind::Authorization, allowed, detail)
                .with_principal(principal)
                .with_topic(topic)
                .with_action(action.as_str()),
        )
        .await;
        allowed
    }

    /// Check a client certificate's validity window.
    pub async fn validate_client_certificate(&self, certificate: &[u8]) -> bool {
        let (valid, detail) = if self.config.enabled {
            let valid = self.tls.validate_client_certificate(certificate);
            (valid, if valid { "within validity window" } else { "rejected" })
        } else {
            (true, "security disabled")
        };

        let mut event = AuditEvent::new(AuditKind::CertificateValidation, valid, detail);
        if let Some(identity) = self.tls.client_identity(certificate) {
            event = event.with_principal(identity);
        }
        self.record(event).await;
        valid
    }

    /// Insert or replace a principal record. Returns `true` when new.
    pub async fn add_user(&self, entry: UserEntry) -> bool {
        let principal = entry.username.clone();
        let added = self.authz.add_user(entry).await;
        let detail = if added { "user added" } else { "user replaced" };
        self.record(
            AuditEvent::new(AuditKind::AdminAction, true, detail).with_principal(principal),
        )
        .await;
        added
    }

    /// Drop a principal record. Returns `false` when unknown.
    pub async fn remove_user(&self, principal: &str) -> bool {
        let removed = self.authz.remove_user(principal).await;
        let detail = if removed { "user removed" } else { "user unknown" };
        self.record(
            AuditEvent::new(AuditKind::AdminAction, removed, detail).with_principal(principal),
        )
        .await;
        removed
    }

    /// Attach a role to a principal. Returns `false` on a no-op.
    pub async fn assign_role(&self, principal: &str, role: &str) -> bool {
        let assigned = self.authz.assign_role(principal, role).await;
        let detail = if assigned {
            format!("assigned role {role}")
        } else {
            format!("role {role} not assigned")
        };
        self.record(
            AuditEvent::new(AuditKind::AdminAction, assigned, detail).with_principal(principal),
        )
        .await;
        assigned
    }

    /// Detach a role from a principal. Returns `false` on a no-op.
    pub async fn remove_role(&self, principal: &str, role: &str) -> bool {
        let removed = self.authz.remove_role(principal, role).await;
        let detail = if removed {
            format!("removed role {role}")
        } else {
            format!("role {role} not held")
        };
        self.record(
            AuditEvent::new(AuditKind::AdminAction, removed, detail).with_principal(principal),
        )
        .await;
        removed
    }

    /// Reporting view of a principal's grants, or `None` when unknown.
    pub async fn get_user_permissions(&self, principal: &str) -> Option<UserPermissions> {
        self.authz.get_user_permissions(principal).await
    }

    /// Re-read the configured sources and swap the tables.
    ///
    /// Both sources are parsed before either table is touched, so a failure
    /// leaves the previous tables fully in place and returns `false`.
    pub async fn reload_configuration(&self) -> bool {
        let staged = self.stage_sources();
        match staged {
            Ok((credentials, acl)) => {
                if let Some(source) = credentials {
                    self.auth.install_credentials(source).await;
                }
                if let Some(source) = acl {
                    self.authz.install(source).await;
                }
                self.record(AuditEvent::new(
                    AuditKind::ConfigReload,
                    true,
                    "reloaded security tables",
                ))
                .await;
                tracing::info!("Reloaded security tables");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "Reload failed; keeping previous security tables");
                self.record(AuditEvent::new(AuditKind::ConfigReload, false, err.to_string()))
                    .await;
                false
            }
        }
    }

    fn stage_sources(&self) -> Result<(Option<CredentialSource>, Option<AclSource>), SourceError> {
        let credentials = match &self.sources.credentials {
            Some(path) => Some(CredentialSource::from_file(path)?),
            None => None,
        };
        let acl = match &self.sources.acl {
            Some(path) => Some(AclSource::from_file(path)?),
            None => None,
        };
        Ok((credentials, acl))
    }

    /// Record an admission rejection raised outside this subsystem.
    pub async fn record_rejection(
        &self,
        principal: &str,
        topic: &str,
        action: &str,
        reason: &str,
    ) {
        self.record(
            AuditEvent::new(AuditKind::Rejection, false, reason)
                .with_principal(principal)
                .with_topic(topic)
                .with_action(action),
        )
        .await;
    }

    /// The most recent audit events, oldest first.
    pub async fn audit_recent(&self, count: usize) -> Vec<AuditEvent> {
        self.audit.recent(count).await
    }

    async fn record(&self, event: AuditEvent) {
        if self.config.audit_log {
            self.audit.record(event).await;
        }
    }
}

/// Errors for building the security subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Configuration is internally inconsistent
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// TLS material missing or unparseable
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// A source file failed to load
    #[error(transparent)]
    Source(#[from] SourceError),
}
