//! # UNS Fabric Security
//!
//! Authentication, authorization, TLS material handling and audit logging
//! for the unified namespace.
//!
//! The [`SecurityManager`] facade is the single entry point brokers use:
//! it authenticates connections (basic credentials, OAuth2 bearer tokens,
//! or client certificates), answers topic-level authorization questions
//! against role and user grant tables, vouches for TLS material, and keeps
//! a bounded in-memory audit trail of every decision.
//!
//! Tables are declarative: credentials and ACLs load from JSON files and
//! can be swapped atomically at runtime via
//! [`SecurityManager::reload_configuration`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod auth;
pub mod authz;
pub mod config;
pub mod manager;
pub mod source;
pub mod tls;

pub use audit::{AuditEvent, AuditKind, AuditLog};
pub use auth::{AuthError, AuthManager, ConnectionContext};
pub use authz::{
    AuthorizationManager, PermissionSet, RoleEntry, TopicAction, UserEntry, UserPermissions,
};
pub use config::{
    AuthMethod, AuthenticationConfig, AuthorizationConfig, ConfigError, DefaultPolicy, OAuthConfig,
    SecurityConfig, TlsConfig,
};
pub use manager::{SecurityError, SecurityManager, SourcePaths};
pub use source::{AclSource, Credential, CredentialSource, SourceError};
pub use tls::{CertificateSummary, TlsError, TlsManager, TlsServerOptions};
