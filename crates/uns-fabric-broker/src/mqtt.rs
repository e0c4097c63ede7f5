//! Embedded MQTT transport.
//!
//! Hosts a rumqttd broker inside the process: a plaintext listener on the
//! configured port and, when TLS material is loaded, a second listener on
//! the derived port (`port + 7000`, so 1883 becomes 8883). The adapter's
//! own publish/subscribe surface runs over a loopback rumqttc client, and
//! deliveries fan out to per-subscription channels by wildcard matching.
//! Fan-out never blocks: a full subscriber channel drops the delivery with
//! a warning.
//!
//! rumqttd has no shutdown API. [`MqttBroker::stop`] tears down the
//! adapter surface (loopback client, driver task, subscriber channels) and
//! leaves the detached broker thread to exit with the process.

use crate::adapter::{
    BrokerAdapter, BrokerError, Delivery, PublishOptions, QosLevel, SubscribeOptions,
    Subscription, SUBSCRIPTION_CAPACITY,
};
use crate::config::MqttBrokerConfig;
use crate::gate::AdmissionGate;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use uns_fabric_core::{EnvelopeError, TopicValidator, UnsMessage, UnsPayload};
use uns_fabric_security::{AuthMethod, CredentialSource, TlsServerOptions};
use uuid::Uuid;

const LOOPBACK_USER: &str = "uns-fabric-loopback";

struct SubscriberEntry {
    pattern: String,
    sender: mpsc::Sender<Delivery>,
}

struct MqttRuntime {
    client: AsyncClient,
    subscriptions: Arc<RwLock<HashMap<Uuid, SubscriberEntry>>>,
    driver: tokio::task::JoinHandle<()>,
}

/// Embedded MQTT broker with an admission-checked adapter surface.
pub struct MqttBroker {
    config: MqttBrokerConfig,
    gate: Arc<AdmissionGate>,
    runtime: Option<MqttRuntime>,
}

impl MqttBroker {
    /// Create a stopped adapter.
    #[must_use]
    pub fn new(config: MqttBrokerConfig, gate: Arc<AdmissionGate>) -> Self {
        Self {
            config,
            gate,
            runtime: None,
        }
    }

    fn runtime(&self) -> Result<&MqttRuntime, BrokerError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| BrokerError::TransportUnavailable("adapter is not started".to_string()))
    }

    fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    /// Credential table for the embedded listener.
    ///
    /// External clients authenticate with the configured table; the
    /// adapter's loopback client gets a per-start random credential so it
    /// can always connect.
    fn listener_logins(&self) -> Result<Vec<(String, String)>, BrokerError> {
        let security = self.gate.security();
        if !security.enabled() || security.authentication_method() != AuthMethod::Basic {
            return Ok(Vec::new());
        }

        let mut logins = Vec::new();
        if let Some(path) = &self.config.credentials_path {
            let source = CredentialSource::from_file(path)
                .map_err(|e| BrokerError::Configuration(e.to_string()))?;
            logins.extend(
                source
                    .users
                    .into_iter()
                    .map(|credential| (credential.username, credential.password)),
            );
        }
        logins.push((LOOPBACK_USER.to_string(), Uuid::new_v4().to_string()));
        Ok(logins)
    }
}

#[async_trait]
impl BrokerAdapter for MqttBroker {
    async fn start(&mut self) -> Result<(), BrokerError> {
        if self.runtime.is_some() {
            return Err(BrokerError::Configuration(
                "adapter is already started".to_string(),
            ));
        }

        let logins = self.listener_logins()?;
        let tls = self.gate.security().tls().server_options();
        let broker_config = embedded_config(&self.config, &logins, tls.as_ref())?;

        let mut broker = rumqttd::Broker::new(broker_config);
        std::thread::Builder::new()
            .name("rumqttd".to_string())
            .spawn(move || {
                if let Err(err) = broker.start() {
                    tracing::error!(error = ?err, "Embedded MQTT broker exited");
                }
            })
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            tls_port = tls.as_ref().map(|_| self.config.tls_port()),
            "Embedded MQTT broker listening"
        );

        let connect_host = if self.config.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.config.host.as_str()
        };
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("uns-fabric-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(client_id, connect_host, self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        let payload_limit = usize::try_from(self.config.max_payload_size).unwrap_or(usize::MAX);
        options.set_max_packet_size(payload_limit, payload_limit);
        if let Some((username, password)) = logins.last() {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, SUBSCRIPTION_CAPACITY);
        await_connack(&mut eventloop, self.connect_timeout()).await?;

        let subscriptions = Arc::new(RwLock::new(HashMap::new()));
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            self.gate.topics().clone(),
            Arc::clone(&subscriptions),
        ));

        self.runtime = Some(MqttRuntime {
            client,
            subscriptions,
            driver,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BrokerError> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        runtime.driver.abort();
        runtime.subscriptions.write().await.clear();
        if let Err(err) = runtime.client.disconnect().await {
            tracing::debug!(error = %err, "Loopback disconnect failed");
        }
        tracing::info!("MQTT adapter surface stopped; embedded broker remains until process exit");
        Ok(())
    }

    async fn publish(
        &self,
        principal: &str,
        topic: &str,
        payload: &UnsPayload,
        options: PublishOptions,
    ) -> Result<(), BrokerError> {
        self.gate.admit_publish(principal, topic, &payload.value).await?;
        let runtime = self.runtime()?;

        let bytes =
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
        runtime
            .client
            .publish(topic, to_qos(options.qos), options.retain, bytes)
            .await
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        tracing::debug!(principal, topic, qos = ?options.qos, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        principal: &str,
        pattern: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BrokerError> {
        self.gate.admit_subscribe(principal, pattern).await?;
        let runtime = self.runtime()?;

        runtime
            .client
            .subscribe(pattern, to_qos(options.qos))
            .await
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        runtime.subscriptions.write().await.insert(
            id,
            SubscriberEntry {
                pattern: pattern.to_string(),
                sender,
            },
        );

        tracing::info!(principal, pattern, subscription = %id, "Subscribed");
        Ok(Subscription::new(id, pattern.to_string(), receiver))
    }

    async fn create_topic(&self, principal: &str, topic: &str) -> Result<(), BrokerError> {
        self.gate.admit_create(principal, topic).await?;
        // MQTT topics exist implicitly; admission is the whole operation.
        tracing::debug!(principal, topic, "Topic admitted");
        Ok(())
    }
}

/// Poll the event loop until the broker accepts the connection.
async fn await_connack(eventloop: &mut EventLoop, timeout: Duration) -> Result<(), BrokerError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BrokerError::TransportUnavailable(
                "timed out waiting for the embedded broker".to_string(),
            ));
        }
        match tokio::time::timeout(remaining, eventloop.poll()).await {
            Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    return Ok(());
                }
                return Err(BrokerError::TransportUnavailable(format!(
                    "broker refused the loopback connection: {:?}",
                    ack.code
                )));
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                // Listener may not be up yet; the event loop reconnects.
                tracing::debug!(error = %err, "Waiting for the embedded broker");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Err(_) => {
                return Err(BrokerError::TransportUnavailable(
                    "timed out waiting for the embedded broker".to_string(),
                ));
            }
        }
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topics: TopicValidator,
    subscriptions: Arc<RwLock<HashMap<Uuid, SubscriberEntry>>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                deliver(&client, &topics, &subscriptions, publish).await;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = %err, "MQTT loopback error");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

async fn deliver(
    client: &AsyncClient,
    topics: &TopicValidator,
    subscriptions: &Arc<RwLock<HashMap<Uuid, SubscriberEntry>>>,
    publish: Publish,
) {
    let topic = publish.topic.clone();
    if topics.validate(&topic, false).is_err() {
        tracing::debug!(topic = %topic, "Dropping delivery outside the namespace");
        return;
    }
    let message = match UnsMessage::from_wire(&topic, &publish.payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(topic = %topic, error = %err, "Dropping undecodable payload");
            return;
        }
    };
    let qos = from_qos(publish.qos);

    let mut stale = Vec::new();
    {
        let subs = subscriptions.read().await;
        for (id, entry) in subs.iter() {
            if !topics.matches(&entry.pattern, &topic) {
                continue;
            }
            let delivery = Delivery {
                message: message.clone(),
                qos,
                retained: publish.retain,
            };
            match entry.sender.try_send(delivery) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        topic = %topic,
                        subscription = %id,
                        "Subscriber lagging; dropping delivery"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*id),
            }
        }
    }

    if stale.is_empty() {
        return;
    }
    let mut subs = subscriptions.write().await;
    for id in stale {
        let Some(entry) = subs.remove(&id) else {
            continue;
        };
        let still_used = subs.values().any(|other| other.pattern == entry.pattern);
        if !still_used {
            if let Err(err) = client.unsubscribe(&entry.pattern).await {
                tracing::warn!(pattern = %entry.pattern, error = %err, "Unsubscribe failed");
            }
        }
    }
}

/// Render the embedded broker configuration and parse it back.
fn embedded_config(
    config: &MqttBrokerConfig,
    logins: &[(String, String)],
    tls: Option<&TlsServerOptions>,
) -> Result<rumqttd::Config, BrokerError> {
    let text = render_config(config, logins, tls)
        .map_err(|e| BrokerError::Configuration(e.to_string()))?;
    toml::from_str(&text)
        .map_err(|e| BrokerError::Configuration(format!("embedded broker config: {e}")))
}

fn render_config(
    config: &MqttBrokerConfig,
    logins: &[(String, String)],
    tls: Option<&TlsServerOptions>,
) -> Result<String, toml::ser::Error> {
    use toml::value::{Table, Value};

    let mut router = Table::new();
    router.insert("id".to_string(), Value::Integer(0));
    router.insert("max_connections".to_string(), Value::Integer(10010));
    router.insert("max_outgoing_packet_count".to_string(), Value::Integer(200));
    router.insert("max_segment_size".to_string(), Value::Integer(104_857_600));
    router.insert("max_segment_count".to_string(), Value::Integer(10));

    let mut v4 = Table::new();
    v4.insert(
        "1".to_string(),
        Value::Table(listener(config, "v4-1", config.port, logins, None)),
    );
    if let Some(options) = tls {
        v4.insert(
            "2".to_string(),
            Value::Table(listener(config, "v4-2", config.tls_port(), logins, Some(options))),
        );
    }

    let mut root = Table::new();
    root.insert("id".to_string(), Value::Integer(0));
    root.insert("router".to_string(), Value::Table(router));
    root.insert("v4".to_string(), Value::Table(v4));

    toml::to_string(&Value::Table(root))
}

fn listener(
    config: &MqttBrokerConfig,
    name: &str,
    port: u16,
    logins: &[(String, String)],
    tls: Option<&TlsServerOptions>,
) -> toml::value::Table {
    use toml::value::{Table, Value};

    let mut connections = Table::new();
    connections.insert("connection_timeout_ms".to_string(), Value::Integer(60_000));
    connections.insert(
        "max_payload_size".to_string(),
        Value::Integer(i64::from(config.max_payload_size)),
    );
    connections.insert("max_inflight_count".to_string(), Value::Integer(100));
    connections.insert("dynamic_filters".to_string(), Value::Boolean(true));
    if !logins.is_empty() {
        let mut auth = Table::new();
        for (username, password) in logins {
            auth.insert(username.clone(), Value::String(password.clone()));
        }
        connections.insert("auth".to_string(), Value::Table(auth));
    }

    let mut table = Table::new();
    table.insert("name".to_string(), Value::String(name.to_string()));
    table.insert(
        "listen".to_string(),
        Value::String(format!("{}:{}", config.host, port)),
    );
    table.insert("next_connection_delay_ms".to_string(), Value::Integer(1));
    table.insert("connections".to_string(), Value::Table(connections));

    if let Some(options) = tls {
        let mut tls_table = Table::new();
        tls_table.insert(
            "certpath".to_string(),
            Value::String(options.cert_path.display().to_string()),
        );
        tls_table.insert(
            "keypath".to_string(),
            Value::String(options.key_path.display().to_string()),
        );
        if let Some(ca_path) = &options.ca_path {
            tls_table.insert(
                "capath".to_string(),
                Value::String(ca_path.display().to_string()),
            );
        }
        table.insert("tls".to_string(), Value::Table(tls_table));
    }
    table
}

fn to_qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn from_qos(qos: QoS) -> QosLevel {
    match qos {
        QoS::AtMostOnce => QosLevel::AtMostOnce,
        QoS::AtLeastOnce => QosLevel::AtLeastOnce,
        QoS::ExactlyOnce => QosLevel::ExactlyOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_logins() -> Vec<(String, String)> {
        vec![
            ("scada".to_string(), "s3cret".to_string()),
            (LOOPBACK_USER.to_string(), "generated".to_string()),
        ]
    }

    #[test]
    fn rendered_config_is_accepted_by_rumqttd() {
        let config = MqttBrokerConfig::default();
        let text = render_config(&config, &[], None).unwrap();
        assert!(text.contains("127.0.0.1:1883"));
        assert!(!text.contains("auth"));

        let parsed: rumqttd::Config = toml::from_str(&text).unwrap();
        let v4 = parsed.v4.expect("v4 listeners");
        assert_eq!(v4.len(), 1);
    }

    #[test]
    fn tls_listener_lands_on_the_derived_port() {
        let config = MqttBrokerConfig::default();
        let tls = TlsServerOptions {
            cert_path: PathBuf::from("/certs/server.pem"),
            key_path: PathBuf::from("/certs/server.key"),
            ca_path: None,
            require_client_cert: false,
        };

        let text = render_config(&config, &[], Some(&tls)).unwrap();
        assert!(text.contains("127.0.0.1:1883"));
        assert!(text.contains("127.0.0.1:8883"));
        assert!(text.contains("certpath"));

        let parsed: rumqttd::Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.v4.expect("v4 listeners").len(), 2);
    }

    #[test]
    fn auth_table_carries_every_login() {
        let config = MqttBrokerConfig::default();
        let text = render_config(&config, &sample_logins(), None).unwrap();
        assert!(text.contains("scada"));
        assert!(text.contains(LOOPBACK_USER));

        let parsed: rumqttd::Config = toml::from_str(&text).unwrap();
        assert!(parsed.v4.is_some());
    }

    #[test]
    fn qos_mapping_round_trips() {
        for level in [
            QosLevel::AtMostOnce,
            QosLevel::AtLeastOnce,
            QosLevel::ExactlyOnce,
        ] {
            assert_eq!(from_qos(to_qos(level)), level);
        }
    }
}
