//! Topic-level authorization.
//!
//! Grants are topic patterns attached to users directly or through roles.
//! A check walks a fixed precedence: disabled allows, admins allow, unknown
//! principals fall to the default policy, then direct grants, then role
//! grants in assignment order, and finally deny.

use crate::config::{AuthorizationConfig, DefaultPolicy};
use crate::source::AclSource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uns_fabric_core::topic::has_wildcards;
use uns_fabric_core::TopicValidator;

/// Action a principal wants to perform on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicAction {
    /// Consume messages from a topic
    Read,
    /// Publish messages to a topic
    Write,
    /// Establish a subscription, possibly with wildcards
    Subscribe,
}

impl TopicAction {
    /// Stable lowercase name for logs and audit records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Subscribe => "subscribe",
        }
    }
}

/// Topic patterns granted per action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionSet {
    /// Patterns granting read access
    pub read: Vec<String>,
    /// Patterns granting write access
    pub write: Vec<String>,
    /// Patterns granting subscription access
    pub subscribe: Vec<String>,
}

impl PermissionSet {
    /// Patterns for one action.
    #[must_use]
    pub fn patterns(&self, action: TopicAction) -> &[String] {
        match action {
            TopicAction::Read => &self.read,
            TopicAction::Write => &self.write,
            TopicAction::Subscribe => &self.subscribe,
        }
    }

    /// All patterns across the three actions.
    pub fn all_patterns(&self) -> impl Iterator<Item = &String> {
        self.read
            .iter()
            .chain(self.write.iter())
            .chain(self.subscribe.iter())
    }

    fn merge_from(&mut self, other: &Self) {
        extend_dedup(&mut self.read, &other.read);
        extend_dedup(&mut self.write, &other.write);
        extend_dedup(&mut self.subscribe, &other.subscribe);
    }
}

/// Named permission bundle from the ACL source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleEntry {
    /// Role name referenced by user records
    pub name: String,
    /// Patterns the role grants
    #[serde(default)]
    pub permissions: PermissionSet,
}

/// Principal record from the ACL source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    /// Principal name as produced by authentication
    pub username: String,
    /// Assigned roles, in grant-evaluation order
    #[serde(default)]
    pub roles: Vec<String>,
    /// Patterns granted directly to the principal
    #[serde(default)]
    pub permissions: PermissionSet,
}

/// Reporting view of a principal's grants.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPermissions {
    /// Principal name
    pub principal: String,
    /// Patterns granted directly
    pub direct: PermissionSet,
    /// Assigned roles in evaluation order
    pub roles: Vec<String>,
    /// Union of direct and role grants, deduplicated
    pub effective: PermissionSet,
}

#[derive(Debug, Clone, Default)]
struct UserRecord {
    roles: Vec<String>,
    permissions: PermissionSet,
}

#[derive(Debug, Default)]
struct AclTables {
    roles: BTreeMap<String, PermissionSet>,
    users: BTreeMap<String, UserRecord>,
}

/// Decides whether a principal may act on a topic.
pub struct AuthorizationManager {
    config: AuthorizationConfig,
    topics: TopicValidator,
    tables: RwLock<AclTables>,
}

impl AuthorizationManager {
    /// Create a manager with empty tables.
    #[must_use]
    pub fn new(config: AuthorizationConfig, topics: TopicValidator) -> Self {
        Self {
            config,
            topics,
            tables: RwLock::new(AclTables::default()),
        }
    }

    /// Whether authorization checks are enabled.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Replace both tables with the given source in one swap.
    ///
    /// Patterns that fail topic validation are kept but warned about; they
    /// can never match a request, so they act as inert denies.
    pub async fn install(&self, source: AclSource) {
        let mut tables = AclTables::default();
        for role in source.roles {
            self.warn_invalid_patterns("role", &role.name, &role.permissions);
            tables.roles.insert(role.name, role.permissions);
        }
        for user in source.users {
            self.warn_invalid_patterns("user", &user.username, &user.permissions);
            for role in &user.roles {
                if !tables.roles.contains_key(role) {
                    tracing::warn!(
                        user = %user.username,
                        role = %role,
                        "User references undefined role"
                    );
                }
            }
            tables.users.insert(
                user.username,
                UserRecord {
                    roles: user.roles,
                    permissions: user.permissions,
                },
            );
        }

        let role_count = tables.roles.len();
        let user_count = tables.users.len();
        *self.tables.write().await = tables;
        tracing::info!(roles = role_count, users = user_count, "Installed ACL tables");
    }

    /// Whether `principal` may perform `action` on `topic`.
    pub async fn authorize(&self, principal: &str, topic: &str, action: TopicAction) -> bool {
        if !self.config.enabled {
            return true;
        }
        if self.config.admin_users.iter().any(|u| u == principal) {
            return true;
        }

        let tables = self.tables.read().await;
        let Some(record) = tables.users.get(principal) else {
            return self.config.default_policy == DefaultPolicy::Allow;
        };

        if self.patterns_allow(record.permissions.patterns(action), topic, action) {
            return true;
        }
        for role in &record.roles {
            if let Some(permissions) = tables.roles.get(role) {
                if self.patterns_allow(permissions.patterns(action), topic, action) {
                    return true;
                }
            }
        }
        false
    }

    /// Attach a role to a principal, creating the principal record if new.
    ///
    /// Returns `false` when the role is undefined or already assigned.
    pub async fn assign_role(&self, principal: &str, role: &str) -> bool {
        let mut tables = self.tables.write().await;
        if !tables.roles.contains_key(role) {
            tracing::warn!(principal, role, "Cannot assign undefined role");
            return false;
        }

        let record = tables.users.entry(principal.to_string()).or_default();
        if record.roles.iter().any(|r| r == role) {
            return false;
        }
        record.roles.push(role.to_string());
        tracing::info!(principal, role, "Assigned role");
        true
    }

    /// Detach a role from a principal.
    ///
    /// Returns `false` when the principal is unknown or did not hold the
    /// role.
    pub async fn remove_role(&self, principal: &str, role: &str) -> bool {
        let mut tables = self.tables.write().await;
        let Some(record) = tables.users.get_mut(principal) else {
            return false;
        };
        let before = record.roles.len();
        record.roles.retain(|r| r != role);
        let removed = record.roles.len() != before;
        if removed {
            tracing::info!(principal, role, "Removed role");
        }
        removed
    }

    /// Insert or replace a principal record.
    ///
    /// Returns `true` when the principal was new.
    pub async fn add_user(&self, entry: UserEntry) -> bool {
        let mut tables = self.tables.write().await;
        let record = UserRecord {
            roles: entry.roles,
            permissions: entry.permissions,
        };
        tables.users.insert(entry.username, record).is_none()
    }

    /// Drop a principal record.
    ///
    /// Returns `false` when the principal was unknown.
    pub async fn remove_user(&self, principal: &str) -> bool {
        let mut tables = self.tables.write().await;
        tables.users.remove(principal).is_some()
    }

    /// Reporting view of a principal, or `None` when unknown.
    pub async fn get_user_permissions(&self, principal: &str) -> Option<UserPermissions> {
        let tables = self.tables.read().await;
        let record = tables.users.get(principal)?;

        let mut effective = PermissionSet::default();
        effective.merge_from(&record.permissions);
        for role in &record.roles {
            if let Some(permissions) = tables.roles.get(role) {
                effective.merge_from(permissions);
            }
        }

        Some(UserPermissions {
            principal: principal.to_string(),
            direct: record.permissions.clone(),
            roles: record.roles.clone(),
            effective,
        })
    }

    /// Whether any granted pattern satisfies the request.
    ///
    /// Wildcard subscription requests need a grant that covers every topic
    /// the request could match; everything else is plain pattern matching.
    fn patterns_allow(&self, patterns: &[String], topic: &str, action: TopicAction) -> bool {
        let wildcard_request = action == TopicAction::Subscribe && has_wildcards(topic);
        patterns.iter().any(|pattern| {
            if wildcard_request {
                self.topics.covers(pattern, topic)
            } else {
                self.topics.matches(pattern, topic)
            }
        })
    }

    fn warn_invalid_patterns(&self, kind: &str, name: &str, permissions: &PermissionSet) {
        for pattern in permissions.all_patterns() {
            if let Err(err) = self.topics.validate(pattern, true) {
                tracing::warn!(
                    kind,
                    name,
                    pattern = %pattern,
                    error = %err,
                    "ACL pattern fails topic validation and can never match"
                );
            }
        }
    }
}

fn extend_dedup(target: &mut Vec<String>, source: &[String]) {
    for pattern in source {
        if !target.contains(pattern) {
            target.push(pattern.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorizationConfig;
    use uns_fabric_core::TopicConfig;

    fn validator() -> TopicValidator {
        TopicValidator::new(TopicConfig::default())
    }

    fn manager(config: AuthorizationConfig) -> AuthorizationManager {
        AuthorizationManager::new(config, validator())
    }

    fn sample_source() -> AclSource {
        AclSource {
            roles: vec![
                RoleEntry {
                    name: "operator".to_string(),
                    permissions: PermissionSet {
                        read: vec![],
                        write: vec!["uns/acme/dallas/#".to_string()],
                        subscribe: vec![],
                    },
                },
                RoleEntry {
                    name: "viewer".to_string(),
                    permissions: PermissionSet {
                        read: vec!["uns/acme/#".to_string()],
                        write: vec![],
                        subscribe: vec!["uns/acme/#".to_string()],
                    },
                },
            ],
            users: vec![
                UserEntry {
                    username: "op1".to_string(),
                    roles: vec!["operator".to_string()],
                    permissions: PermissionSet::default(),
                },
                UserEntry {
                    username: "dash".to_string(),
                    roles: vec!["viewer".to_string()],
                    permissions: PermissionSet {
                        read: vec!["uns/acme/austin/packaging".to_string()],
                        write: vec![],
                        subscribe: vec![],
                    },
                },
            ],
        }
    }

    #[tokio::test]
    async fn disabled_authorization_allows_everything() {
        let config = AuthorizationConfig {
            enabled: false,
            ..AuthorizationConfig::default()
        };
        let authz = manager(config);
        assert!(authz.authorize("nobody", "uns/acme/dallas/data", TopicAction::Write).await);
    }

    #[tokio::test]
    async fn admin_bypasses_tables() {
        let config = AuthorizationConfig {
            admin_users: vec!["root".to_string()],
            ..AuthorizationConfig::default()
        };
        let authz = manager(config);
        assert!(authz.authorize("root", "uns/acme/dallas/data", TopicAction::Write).await);
        assert!(!authz.authorize("guest", "uns/acme/dallas/data", TopicAction::Write).await);
    }

    #[tokio::test]
    async fn unknown_principal_follows_default_policy() {
        let deny = manager(AuthorizationConfig::default());
        assert!(!deny.authorize("ghost", "uns/acme/dallas/data", TopicAction::Read).await);

        let allow = manager(AuthorizationConfig {
            default_policy: DefaultPolicy::Allow,
            ..AuthorizationConfig::default()
        });
        assert!(allow.authorize("ghost", "uns/acme/dallas/data", TopicAction::Read).await);
    }

    #[tokio::test]
    async fn role_grants_apply_per_action() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        // operator may write under dallas but holds no read grant
        assert!(authz.authorize("op1", "uns/acme/dallas/line1/data", TopicAction::Write).await);
        assert!(!authz.authorize("op1", "uns/acme/dallas/line1/data", TopicAction::Read).await);
        // and nothing outside the granted subtree
        assert!(!authz.authorize("op1", "uns/acme/austin/line1/data", TopicAction::Write).await);
    }

    #[tokio::test]
    async fn direct_grants_apply_before_roles() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        assert!(authz.authorize("dash", "uns/acme/austin/packaging", TopicAction::Read).await);
        // viewer role still reachable
        assert!(authz.authorize("dash", "uns/acme/dallas/metrics", TopicAction::Read).await);
        assert!(!authz.authorize("dash", "uns/acme/dallas/metrics", TopicAction::Write).await);
    }

    #[tokio::test]
    async fn wildcard_subscription_needs_covering_grant() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        // viewer holds subscribe on uns/acme/# which covers narrower requests
        assert!(authz.authorize("dash", "uns/acme/dallas/#", TopicAction::Subscribe).await);
        assert!(authz.authorize("dash", "uns/acme/+/metrics", TopicAction::Subscribe).await);

        // a narrow grant must not satisfy a wider request
        let narrow = AclSource {
            roles: vec![],
            users: vec![UserEntry {
                username: "cell".to_string(),
                roles: vec![],
                permissions: PermissionSet {
                    read: vec![],
                    write: vec![],
                    subscribe: vec!["uns/acme/dallas/line1/#".to_string()],
                },
            }],
        };
        authz.install(narrow).await;
        assert!(!authz.authorize("cell", "uns/acme/#", TopicAction::Subscribe).await);
        assert!(authz.authorize("cell", "uns/acme/dallas/line1/#", TopicAction::Subscribe).await);
    }

    #[tokio::test]
    async fn assign_role_requires_existing_role() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        assert!(!authz.assign_role("op1", "no-such-role").await);
        assert!(authz.assign_role("op1", "viewer").await);
        // second assignment is a no-op
        assert!(!authz.assign_role("op1", "viewer").await);
        // newly reachable through the added role
        assert!(authz.authorize("op1", "uns/acme/austin/metrics", TopicAction::Read).await);
    }

    #[tokio::test]
    async fn assign_role_creates_principal_record() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        assert!(authz.assign_role("fresh", "viewer").await);
        assert!(authz.authorize("fresh", "uns/acme/dallas/metrics", TopicAction::Read).await);
    }

    #[tokio::test]
    async fn remove_role_is_idempotent() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        assert!(authz.remove_role("op1", "operator").await);
        assert!(!authz.remove_role("op1", "operator").await);
        assert!(!authz.remove_role("ghost", "operator").await);
        assert!(!authz.authorize("op1", "uns/acme/dallas/line1/data", TopicAction::Write).await);
    }

    #[tokio::test]
    async fn add_and_remove_user() {
        let authz = manager(AuthorizationConfig::default());
        authz.install(sample_source()).await;

        let entry = UserEntry {
            username: "newbie".to_string(),
            roles: vec![],
            permissions: PermissionSet::default(),
        };
        assert!(authz.add_user(entry.clone()).await);
        assert!(!authz.add_user(entry).await);
        assert!(authz.remove_user("newbie").await);
        assert!(!authz.remove_user("newbie").await);
    }

    #[tokio::test]
    async fn user_permissions_report_dedups_effective() {
        let authz = manager(AuthorizationConfig::default());
        let source = AclSource {
            roles: vec![RoleEntry {
                name: "viewer".to_string(),
                permissions: PermissionSet {
                    read: vec!["uns/acme/#".to_string(), "uns/beta/#".to_string()],
                    write: vec![],
                    subscribe: vec![],
                },
            }],
            users: vec![UserEntry {
                username: "dash".to_string(),
                roles: vec!["viewer".to_string()],
                permissions: PermissionSet {
                    read: vec!["uns/acme/#".to_string()],
                    write: vec![],
                    subscribe: vec![],
                },
            }],
        };
        authz.install(source).await;

        let report = authz.get_user_permissions("dash").await.unwrap();
        assert_eq!(report.principal, "dash");
        assert_eq!(report.direct.read, vec!["uns/acme/#".to_string()]);
        assert_eq!(report.roles, vec!["viewer".to_string()]);
        assert_eq!(
            report.effective.read,
            vec!["uns/acme/#".to_string(), "uns/beta/#".to_string()]
        );

        assert!(authz.get_user_permissions("ghost").await.is_none());
    }
}
