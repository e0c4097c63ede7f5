//! Declarative security sources.
//!
//! Two JSON documents feed the in-memory tables: the ACL file (roles and
//! users) and the credential file (username/password pairs). Both are read
//! fully before any table is touched, so a malformed file can never leave
//! half-applied state.

use crate::authz::{RoleEntry, UserEntry};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ACL document: role definitions plus user entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AclSource {
    /// Role definitions
    pub roles: Vec<RoleEntry>,
    /// User entries with role assignments and direct permissions
    pub users: Vec<UserEntry>,
}

impl AclSource {
    /// Parse an ACL document from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not parse.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SourceError> {
        serde_json::from_slice(bytes).map_err(|e| SourceError::Parse(e.to_string()))
    }

    /// Load an ACL document from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Parse(format!("{}: {e}", path.display())))
    }
}

/// One username/password pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Login name
    pub username: String,
    /// Shared secret
    pub password: String,
}

/// Credential document for basic authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CredentialSource {
    /// Credential entries
    pub users: Vec<Credential>,
}

impl CredentialSource {
    /// Load a credential document from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let bytes = std::fs::read(path)
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::Parse(format!("{}: {e}", path.display())))
    }
}

/// Errors for declarative source loading.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// File could not be read
    #[error("failed to read source: {0}")]
    Io(String),
    /// Document rejected
    #[error("failed to parse source: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles_and_users() {
        let source = AclSource::from_json(
            br#"{
                "roles": [
                    { "name": "operator", "permissions": { "write": ["uns/acme/+/cmd"] } }
                ],
                "users": [
                    { "username": "op1", "roles": ["operator"] },
                    { "username": "viewer", "permissions": { "read": ["uns/acme/#"] } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(source.roles.len(), 1);
        assert_eq!(source.roles[0].name, "operator");
        assert_eq!(source.users.len(), 2);
        assert_eq!(source.users[0].roles, vec!["operator".to_string()]);
        assert_eq!(
            source.users[1].permissions.read,
            vec!["uns/acme/#".to_string()]
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(AclSource::from_json(b"{ nope").is_err());
        assert!(AclSource::from_json(br#"{ "users": 7 }"#).is_err());
    }

    #[test]
    fn credential_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(
            &path,
            br#"{ "users": [ { "username": "op1", "password": "s3cret" } ] }"#,
        )
        .unwrap();

        let source = CredentialSource::from_file(&path).unwrap();
        assert_eq!(source.users.len(), 1);
        assert_eq!(source.users[0].username, "op1");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = AclSource::from_file(Path::new("/nonexistent/acl.json"));
        assert!(matches!(result, Err(SourceError::Io(_))));
    }
}
