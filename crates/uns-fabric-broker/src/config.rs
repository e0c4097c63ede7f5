//! Adapter configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

use crate::adapter::BrokerError;

/// Which transport backs the namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Embedded MQTT broker
    Mqtt,
    /// External Kafka cluster
    Kafka,
}

impl FromStr for BrokerKind {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "mqtt" => Ok(Self::Mqtt),
            "kafka" => Ok(Self::Kafka),
            other => Err(BrokerError::Configuration(format!(
                "unknown broker kind '{other}' (expected 'mqtt' or 'kafka')"
            ))),
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mqtt => write!(f, "mqtt"),
            Self::Kafka => write!(f, "kafka"),
        }
    }
}

/// Embedded MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttBrokerConfig {
    /// Bind address for the plaintext listener
    pub host: String,
    /// Plaintext listener port; the TLS listener derives from it
    pub port: u16,
    /// Client id of the adapter's loopback client
    pub client_id: Option<String>,
    /// Deadline for the loopback client's connection handshake, in seconds
    pub connect_timeout_secs: u64,
    /// Maximum accepted payload size in bytes
    pub max_payload_size: u32,
    /// Credential table wired into the listener for basic authentication
    pub credentials_path: Option<PathBuf>,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: None,
            connect_timeout_secs: 5,
            max_payload_size: 1_048_576,
            credentials_path: None,
        }
    }
}

impl MqttBrokerConfig {
    /// Fill host and port from a broker URL such as `tcp://host:1883`.
    ///
    /// A bare `host:port` or `host` is accepted as well.
    ///
    /// # Errors
    ///
    /// Returns error when the URL has an unsupported scheme or no host.
    pub fn with_url(mut self, input: &str) -> Result<Self, BrokerError> {
        let (host, port) = parse_broker_url(input)?;
        self.host = host;
        self.port = port;
        Ok(self)
    }

    /// Port of the derived TLS listener.
    #[must_use]
    pub fn tls_port(&self) -> u16 {
        self.port.saturating_add(7000)
    }
}

/// Kafka adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KafkaBrokerConfig {
    /// Comma-separated bootstrap servers
    pub bootstrap_servers: String,
    /// Client id applied to the producer, admin, and consumer clients
    pub client_id: Option<String>,
    /// Partition count for auto-created topics
    pub partitions: i32,
    /// Replication factor for auto-created topics
    pub replication_factor: i32,
    /// Timeout for admin and produce operations, in seconds
    pub operation_timeout_secs: u64,
}

impl Default for KafkaBrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: None,
            partitions: 3,
            replication_factor: 1,
            operation_timeout_secs: 5,
        }
    }
}

/// Parse a broker endpoint into host and port.
fn parse_broker_url(input: &str) -> Result<(String, u16), BrokerError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| BrokerError::Configuration(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(BrokerError::Configuration(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::Configuration(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BrokerError::Configuration(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            BrokerError::Configuration(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(BrokerError::Configuration(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}
