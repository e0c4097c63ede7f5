//! Admission control shared by both transports.
//!
//! Every publish passes three checks in order: topic shape, authorization,
//! payload schema. Subscriptions and topic creation pass the first two. The
//! first failure rejects the operation with its specific error; nothing is
//! admitted partially.

use crate::adapter::BrokerError;
use std::sync::Arc;
use uns_fabric_core::TopicValidator;
use uns_fabric_schema::SchemaValidator;
use uns_fabric_security::{ConnectionContext, SecurityManager, TopicAction};

/// Shared admission checks in front of a transport.
pub struct AdmissionGate {
    topics: TopicValidator,
    security: Arc<SecurityManager>,
    schemas: Arc<SchemaValidator>,
}

impl AdmissionGate {
    /// Compose the gate from its three layers.
    #[must_use]
    pub fn new(
        topics: TopicValidator,
        security: Arc<SecurityManager>,
        schemas: Arc<SchemaValidator>,
    ) -> Self {
        Self {
            topics,
            security,
            schemas,
        }
    }

    /// Topic validator, for delivery-side matching.
    #[must_use]
    pub fn topics(&self) -> &TopicValidator {
        &self.topics
    }

    /// Security facade backing this gate.
    #[must_use]
    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    /// Authenticate a connection and return its principal.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AuthenticationFailed`] with the mechanism's
    /// rejection reason.
    pub async fn authenticate(&self, context: &ConnectionContext) -> Result<String, BrokerError> {
        self.security
            .authenticate_client(context)
            .await
            .map_err(BrokerError::from)
    }

    /// Admit a publish: topic shape, then authorization, then schema.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub async fn admit_publish(
        &self,
        principal: &str,
        topic: &str,
        value: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        if let Err(err) = self.topics.validate(topic, false) {
            self.security
                .record_rejection(principal, topic, "write", &err.to_string())
                .await;
            return Err(BrokerError::InvalidTopic(err));
        }

        if !self
            .security
            .authorize_client(principal, topic, TopicAction::Write)
            .await
        {
            return Err(denied(principal, "write", topic));
        }

        match self.schemas.check_value(topic, value).await {
            Ok(Some(schema_id)) => {
                tracing::debug!(topic, schema_id = %schema_id, "Payload passed schema");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                self.security
                    .record_rejection(principal, topic, "write", &err.to_string())
                    .await;
                Err(BrokerError::Schema(err))
            }
        }
    }

    /// Admit a subscription: pattern shape, then authorization.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub async fn admit_subscribe(
        &self,
        principal: &str,
        pattern: &str,
    ) -> Result<(), BrokerError> {
        if let Err(err) = self.topics.validate(pattern, true) {
            self.security
                .record_rejection(principal, pattern, "subscribe", &err.to_string())
                .await;
            return Err(BrokerError::InvalidTopic(err));
        }

        if !self
            .security
            .authorize_client(principal, pattern, TopicAction::Subscribe)
            .await
        {
            return Err(denied(principal, "subscribe", pattern));
        }
        Ok(())
    }

    /// Admit explicit topic creation: shape, then write authorization.
    ///
    /// # Errors
    ///
    /// Returns the first failing check's error.
    pub async fn admit_create(&self, principal: &str, topic: &str) -> Result<(), BrokerError> {
        if let Err(err) = self.topics.validate(topic, false) {
            self.security
                .record_rejection(principal, topic, "create", &err.to_string())
                .await;
            return Err(BrokerError::InvalidTopic(err));
        }

        if !self
            .security
            .authorize_client(principal, topic, TopicAction::Write)
            .await
        {
            return Err(denied(principal, "create", topic));
        }
        Ok(())
    }
}

fn denied(principal: &str, action: &str, topic: &str) -> BrokerError {
    BrokerError::AuthorizationDenied {
        principal: principal.to_string(),
        action: action.to_string(),
        topic: topic.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uns_fabric_core::TopicConfig;
    use uns_fabric_schema::{SchemaConfig, SchemaEntry};
    use uns_fabric_security::{SecurityConfig, SourcePaths};

    const ACL: &str = r#"{
        "roles": [
            {"name": "line", "permissions": {
                "write": ["uns/acme/dallas/#"],
                "subscribe": ["uns/acme/#"]
            }}
        ],
        "users": [
            {"username": "op1", "roles": ["line"]}
        ]
    }"#;

    async fn build_gate(schema_config: SchemaConfig) -> (AdmissionGate, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let acl_path = dir.path().join("acl.json");
        std::fs::write(&acl_path, ACL).unwrap();

        let topics = TopicValidator::new(TopicConfig::default());
        let security = Arc::new(
            SecurityManager::new(
                SecurityConfig::default(),
                SourcePaths {
                    credentials: None,
                    acl: Some(acl_path),
                },
                topics.clone(),
            )
            .await
            .unwrap(),
        );
        let schemas = Arc::new(SchemaValidator::new(schema_config, topics.clone()).unwrap());
        schemas
            .add_schema(SchemaEntry {
                id: "temperature".to_string(),
                schema: json!({"type": "number"}),
                topic_patterns: vec!["uns/acme/dallas/+/temperature".to_string()],
            })
            .await
            .unwrap();

        (AdmissionGate::new(topics, security, schemas), dir)
    }

    #[tokio::test]
    async fn publish_admission_checks_run_in_order() {
        let (gate, _dir) = build_gate(SchemaConfig::default()).await;

        // Happy path: shaped topic, granted principal, conforming payload.
        gate.admit_publish("op1", "uns/acme/dallas/line1/temperature", &json!(21.5))
            .await
            .unwrap();

        // Shape failure comes first, even for an unauthorized principal.
        let err = gate
            .admit_publish("ghost", "uns/acme/+/line1/temperature", &json!(21.5))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidTopic(_)));

        // Authorization failure comes before schema checking.
        let err = gate
            .admit_publish("ghost", "uns/acme/dallas/line1/temperature", &json!("hot"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthorizationDenied { .. }));

        // Schema violation is last.
        let err = gate
            .admit_publish("op1", "uns/acme/dallas/line1/temperature", &json!("hot"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Schema(_)));
    }

    #[tokio::test]
    async fn rejections_reach_the_audit_log() {
        let (gate, _dir) = build_gate(SchemaConfig::default()).await;

        let before = gate.security().audit_recent(100).await.len();
        let _ = gate
            .admit_publish("op1", "not-a-namespace-topic", &json!(1))
            .await;
        let events = gate.security().audit_recent(100).await;
        assert_eq!(events.len(), before + 1);
        assert!(!events.last().unwrap().allowed);
    }

    #[tokio::test]
    async fn subscribe_admission() {
        let (gate, _dir) = build_gate(SchemaConfig::default()).await;

        gate.admit_subscribe("op1", "uns/acme/dallas/#").await.unwrap();
        gate.admit_subscribe("op1", "uns/acme/+/line1/temperature")
            .await
            .unwrap();

        let err = gate.admit_subscribe("ghost", "uns/acme/#").await.unwrap_err();
        assert!(matches!(err, BrokerError::AuthorizationDenied { .. }));

        // '#' not in final position never reaches authorization.
        let err = gate.admit_subscribe("op1", "uns/#/dallas").await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidTopic(_)));
    }

    #[tokio::test]
    async fn create_requires_write_grant() {
        let (gate, _dir) = build_gate(SchemaConfig::default()).await;

        gate.admit_create("op1", "uns/acme/dallas/line2/temperature")
            .await
            .unwrap();
        let err = gate
            .admit_create("op1", "uns/acme/austin/line1/temperature")
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthorizationDenied { .. }));
    }

    #[tokio::test]
    async fn strict_mode_requires_a_schema() {
        let strict = SchemaConfig {
            strict: true,
            ..SchemaConfig::default()
        };
        let (gate, _dir) = build_gate(strict).await;

        // No schema bound for this message type.
        let err = gate
            .admit_publish("op1", "uns/acme/dallas/line1/pressure", &json!(3.2))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Schema(_)));
    }

    #[tokio::test]
    async fn authenticate_maps_to_broker_error() {
        let (gate, _dir) = build_gate(SchemaConfig::default()).await;

        // Default config: basic auth against an empty credential table.
        let err = gate
            .authenticate(&ConnectionContext::basic("op1", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthenticationFailed(_)));
    }
}
