//! Agent configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use uns_fabric_broker::{BrokerKind, KafkaBrokerConfig, MqttBrokerConfig};
use uns_fabric_schema::SchemaConfig;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Broker backend to run
    pub broker: BrokerKind,

    /// MQTT settings (used when `broker` is `mqtt`)
    pub mqtt: MqttBrokerConfig,

    /// Kafka settings (used when `broker` is `kafka`)
    pub kafka: KafkaBrokerConfig,

    /// Root namespace override for topic validation
    pub root_namespace: Option<String>,

    /// Security configuration file (JSON)
    pub security_config: Option<PathBuf>,

    /// Credential table file
    pub credentials: Option<PathBuf>,

    /// ACL table file
    pub acl: Option<PathBuf>,

    /// Directory of schema registration files
    pub schema_dir: Option<PathBuf>,

    /// Schema validation settings
    pub schema: SchemaConfig,

    /// Username for the agent's own session
    pub username: Option<String>,

    /// Password for the agent's own session
    pub password: Option<String>,

    /// Namespace subscriptions to mirror into the log
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Subscription configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Topic pattern, wildcards allowed
    pub pattern: String,

    /// Consumer group identifier (Kafka only)
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Mqtt,
            mqtt: MqttBrokerConfig::default(),
            kafka: KafkaBrokerConfig::default(),
            root_namespace: None,
            security_config: None,
            credentials: None,
            acl: None,
            schema_dir: None,
            schema: SchemaConfig::default(),
            username: None,
            password: None,
            subscriptions: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `UNS_FABRIC_BROKER`: "mqtt" or "kafka"
    /// - `UNS_FABRIC_MQTT_URL`: MQTT listener address (`tcp://host:port`)
    /// - `UNS_FABRIC_KAFKA_SERVERS`: Kafka bootstrap servers
    /// - `UNS_FABRIC_ROOT_NAMESPACE`: root namespace segment
    /// - `UNS_FABRIC_SECURITY_CONFIG`: security configuration file
    /// - `UNS_FABRIC_CREDENTIALS`: credential table file
    /// - `UNS_FABRIC_ACL`: role and user permission file
    /// - `UNS_FABRIC_SCHEMA_DIR`: schema registration directory
    /// - `UNS_FABRIC_SCHEMA_STRICT`: reject payloads without a schema
    /// - `UNS_FABRIC_SPARKPLUG_FALLBACK`: Sparkplug-B default for unmatched topics
    /// - `UNS_FABRIC_USERNAME` / `UNS_FABRIC_PASSWORD`: agent session login
    /// - `UNS_FABRIC_SUBSCRIPTIONS`: JSON list of subscriptions
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(kind) = std::env::var("UNS_FABRIC_BROKER") {
            config.broker = kind.parse().context("Invalid UNS_FABRIC_BROKER")?;
        }

        if let Ok(url) = std::env::var("UNS_FABRIC_MQTT_URL") {
            config.mqtt = config
                .mqtt
                .with_url(&url)
                .context("Invalid UNS_FABRIC_MQTT_URL")?;
        }

        if let Ok(servers) = std::env::var("UNS_FABRIC_KAFKA_SERVERS") {
            config.kafka.bootstrap_servers = servers;
        }

        if let Ok(root) = std::env::var("UNS_FABRIC_ROOT_NAMESPACE") {
            config.root_namespace = Some(root);
        }

        if let Ok(path) = std::env::var("UNS_FABRIC_SECURITY_CONFIG") {
            config.security_config = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("UNS_FABRIC_CREDENTIALS") {
            let path = PathBuf::from(path);
            // The embedded MQTT listener enforces the same table.
            config.mqtt.credentials_path = Some(path.clone());
            config.credentials = Some(path);
        }

        if let Ok(path) = std::env::var("UNS_FABRIC_ACL") {
            config.acl = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("UNS_FABRIC_SCHEMA_DIR") {
            config.schema_dir = Some(PathBuf::from(path));
        }

        if let Ok(strict) = std::env::var("UNS_FABRIC_SCHEMA_STRICT") {
            config.schema.strict = strict.parse().context("Invalid UNS_FABRIC_SCHEMA_STRICT")?;
        }

        if let Ok(fallback) = std::env::var("UNS_FABRIC_SPARKPLUG_FALLBACK") {
            config.schema.sparkplug_fallback = fallback
                .parse()
                .context("Invalid UNS_FABRIC_SPARKPLUG_FALLBACK")?;
        }

        if let Ok(username) = std::env::var("UNS_FABRIC_USERNAME") {
            config.username = Some(username);
        }

        if let Ok(password) = std::env::var("UNS_FABRIC_PASSWORD") {
            config.password = Some(password);
        }

        // Parse subscriptions from JSON env var
        if let Ok(subs_json) = std::env::var("UNS_FABRIC_SUBSCRIPTIONS") {
            config.subscriptions =
                serde_json::from_str(&subs_json).context("Invalid UNS_FABRIC_SUBSCRIPTIONS JSON")?;
        }

        Ok(config)
    }
}
