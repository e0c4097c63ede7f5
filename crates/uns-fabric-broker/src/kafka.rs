//! Kafka transport.
//!
//! Maps the namespace onto Kafka: topic names swap `/` for `.`, and since
//! segments may themselves contain dots the exact UNS topic additionally
//! rides in a `uns-topic` message header, so deliveries are lossless.
//! Wildcard patterns become anchored regex subscriptions; deliveries are
//! re-checked against the pattern via the header topic because the regex
//! can over-match dotted segments.
//!
//! Missing topics are created with the configured partition and
//! replication counts before the first publish. Each subscription runs its
//! own consumer under a caller-chosen group id; a group id already active
//! in this process is rejected.

use crate::adapter::{
    BrokerAdapter, BrokerError, Delivery, PublishOptions, QosLevel, SubscribeOptions,
    Subscription, SUBSCRIPTION_CAPACITY,
};
use crate::config::KafkaBrokerConfig;
use crate::gate::AdmissionGate;
use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use uns_fabric_core::topic::has_wildcards;
use uns_fabric_core::{EnvelopeError, TopicValidator, UnsMessage, UnsPayload};
use uuid::Uuid;

const TOPIC_HEADER: &str = "uns-topic";

struct KafkaRuntime {
    producer: FutureProducer,
    admin: AdminClient<DefaultClientContext>,
}

/// Kafka-backed adapter with an admission-checked surface.
pub struct KafkaBroker {
    config: KafkaBrokerConfig,
    gate: Arc<AdmissionGate>,
    runtime: Option<KafkaRuntime>,
    groups: Arc<Mutex<HashSet<String>>>,
    known_topics: RwLock<HashSet<String>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl KafkaBroker {
    /// Create a stopped adapter.
    #[must_use]
    pub fn new(config: KafkaBrokerConfig, gate: Arc<AdmissionGate>) -> Self {
        Self {
            config,
            gate,
            runtime: None,
            groups: Arc::new(Mutex::new(HashSet::new())),
            known_topics: RwLock::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn runtime(&self) -> Result<&KafkaRuntime, BrokerError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| BrokerError::TransportUnavailable("adapter is not started".to_string()))
    }

    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.operation_timeout_secs)
    }

    /// Settings shared by the producer, admin, and consumer clients.
    fn base_client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &self.config.bootstrap_servers);
        if let Some(client_id) = &self.config.client_id {
            client_config.set("client.id", client_id);
        }
        client_config
    }

    async fn ensure_topic(
        &self,
        admin: &AdminClient<DefaultClientContext>,
        topic_name: &str,
    ) -> Result<(), BrokerError> {
        {
            let known = self.known_topics.read().await;
            if known.contains(topic_name) {
                return Ok(());
            }
        }

        let new_topic = NewTopic::new(
            topic_name,
            self.config.partitions,
            TopicReplication::Fixed(self.config.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(self.operation_timeout()));
        let results = admin
            .create_topics([&new_topic], &options)
            .await
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;
        for result in results {
            match result {
                Ok(_) => {
                    tracing::info!(
                        topic = topic_name,
                        partitions = self.config.partitions,
                        replication = self.config.replication_factor,
                        "Created Kafka topic"
                    );
                }
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BrokerError::TransportUnavailable(format!(
                        "create topic {name}: {code}"
                    )));
                }
            }
        }

        self.known_topics.write().await.insert(topic_name.to_string());
        Ok(())
    }

    async fn start_consumer(
        &self,
        pattern: &str,
        group_id: &str,
        qos: QosLevel,
    ) -> Result<Subscription, BrokerError> {
        // Validate the adapter is running before any client is built.
        let _ = self.runtime()?;

        let consumer: StreamConsumer = self
            .base_client_config()
            .set("group.id", group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        let target = if has_wildcards(pattern) {
            pattern_regex(pattern)
        } else {
            kafka_topic_name(pattern)
        };
        consumer
            .subscribe(&[target.as_str()])
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let topics = self.gate.topics().clone();
        let pattern_owned = pattern.to_string();
        let groups = Arc::clone(&self.groups);
        let group_owned = group_id.to_string();
        let handle = tokio::spawn(async move {
            consume(consumer, topics, pattern_owned, qos, sender).await;
            groups.lock().await.remove(&group_owned);
        });
        self.tasks.lock().await.push(handle);

        Ok(Subscription::new(id, pattern.to_string(), receiver))
    }
}

#[async_trait]
impl BrokerAdapter for KafkaBroker {
    async fn start(&mut self) -> Result<(), BrokerError> {
        if self.runtime.is_some() {
            return Err(BrokerError::Configuration(
                "adapter is already started".to_string(),
            ));
        }

        let client_config = self.base_client_config();
        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;
        let admin: AdminClient<DefaultClientContext> = client_config
            .create()
            .map_err(|e| BrokerError::TransportUnavailable(e.to_string()))?;

        tracing::info!(
            bootstrap_servers = %self.config.bootstrap_servers,
            "Kafka adapter started"
        );
        self.runtime = Some(KafkaRuntime { producer, admin });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BrokerError> {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        self.groups.lock().await.clear();
        self.known_topics.write().await.clear();
        self.runtime = None;
        tracing::info!("Kafka adapter stopped");
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

        let kafka_topic = kafka_topic_name(topic);
        self.ensure_topic(&runtime.admin, &kafka_topic).await?;

        let bytes =
            serde_json::to_vec(payload).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
        let headers = OwnedHeaders::new().insert(Header {
            key: TOPIC_HEADER,
            value: Some(topic),
        });
        let record = FutureRecord::to(&kafka_topic)
            .key(topic)
            .payload(&bytes)
            .headers(headers);

        runtime
            .producer
            .send(record, self.operation_timeout())
            .await
            .map_err(|(err, _)| BrokerError::TransportUnavailable(err.to_string()))?;

        tracing::debug!(principal, topic, kafka_topic = %kafka_topic, qos = ?options.qos, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        principal: &str,
        pattern: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BrokerError> {
        self.gate.admit_subscribe(principal, pattern).await?;

        let group_id = options.group_id.clone().ok_or_else(|| {
            BrokerError::Configuration(
                "kafka subscriptions require a consumer-group id".to_string(),
            )
        })?;

        {
            let mut groups = self.groups.lock().await;
            if !groups.insert(group_id.clone()) {
                return Err(BrokerError::DuplicateConsumerGroup(group_id));
            }
        }

        match self.start_consumer(pattern, &group_id, options.qos).await {
            Ok(subscription) => {
                tracing::info!(
                    principal,
                    pattern,
                    group_id = %group_id,
                    subscription = %subscription.id(),
                    "Subscribed"
                );
                Ok(subscription)
            }
            Err(err) => {
                // Release the claim so the group id can be retried.
                self.groups.lock().await.remove(&group_id);
                Err(err)
            }
        }
    }

    async fn create_topic(&self, principal: &str, topic: &str) -> Result<(), BrokerError> {
        self.gate.admit_create(principal, topic).await?;
        let runtime = self.runtime()?;
        self.ensure_topic(&runtime.admin, &kafka_topic_name(topic)).await?;
        tracing::debug!(principal, topic, "Topic ensured");
        Ok(())
    }
}

async fn consume(
    consumer: StreamConsumer,
    topics: TopicValidator,
    pattern: String,
    qos: QosLevel,
    sender: mpsc::Sender<Delivery>,
) {
    loop {
        tokio::select! {
            () = sender.closed() => break,
            result = consumer.recv() => match result {
                Ok(message) => {
                    let Some(delivery) = delivery_from(&topics, &pattern, qos, &message) else {
                        continue;
                    };
                    if sender.send(delivery).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Kafka consumer error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

fn delivery_from(
    topics: &TopicValidator,
    pattern: &str,
    qos: QosLevel,
    message: &BorrowedMessage<'_>,
) -> Option<Delivery> {
    let uns_topic =
        header_topic(message).unwrap_or_else(|| uns_topic_name(message.topic()));
    if !topics.matches(pattern, &uns_topic) {
        return None;
    }

    let payload = message.payload()?;
    match UnsMessage::from_wire(&uns_topic, payload) {
        Ok(message) => Some(Delivery {
            message,
            qos,
            retained: false,
        }),
        Err(err) => {
            tracing::warn!(topic = %uns_topic, error = %err, "Dropping undecodable payload");
            None
        }
    }
}

fn header_topic(message: &BorrowedMessage<'_>) -> Option<String> {
    let headers = message.headers()?;
    headers
        .iter()
        .find(|header| header.key == TOPIC_HEADER)
        .and_then(|header| header.value)
        .and_then(|value| std::str::from_utf8(value).ok())
        .map(ToString::to_string)
}

/// UNS topic to Kafka topic name.
fn kafka_topic_name(topic: &str) -> String {
    topic.replace('/', ".")
}

/// Kafka topic name back to a UNS topic. Lossy for dotted segments; the
/// `uns-topic` header is authoritative when present.
fn uns_topic_name(name: &str) -> String {
    name.replace('.', "/")
}

/// Anchored regex over Kafka topic names equivalent to an MQTT pattern.
fn pattern_regex(pattern: &str) -> String {
    let mut prefix: Vec<String> = Vec::new();
    for segment in pattern.split('/') {
        match segment {
            "#" => {
                if prefix.is_empty() {
                    return "^.*$".to_string();
                }
                return format!("^{}(\\..*)?$", prefix.join("\\."));
            }
            "+" => prefix.push("[^.]+".to_string()),
            literal => prefix.push(literal.replace('.', "\\.")),
        }
    }
    format!("^{}$", prefix.join("\\."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uns_fabric_core::{TopicConfig, UnsPayload};
    use uns_fabric_schema::{SchemaConfig, SchemaValidator};
    use uns_fabric_security::{SecurityConfig, SecurityManager, SourcePaths};

    #[test]
    fn topic_names_swap_separators() {
        assert_eq!(kafka_topic_name("uns/acme/dallas/temp"), "uns.acme.dallas.temp");
        assert_eq!(uns_topic_name("uns.acme.dallas.temp"), "uns/acme/dallas/temp");
    }

    #[test]
    fn patterns_translate_to_anchored_regex() {
        assert_eq!(pattern_regex("uns/acme/#"), "^uns\\.acme(\\..*)?$");
        assert_eq!(
            pattern_regex("uns/+/dallas/temp"),
            "^uns\\.[^.]+\\.dallas\\.temp$"
        );
        assert_eq!(
            pattern_regex("uns/acme/dallas/temp"),
            "^uns\\.acme\\.dallas\\.temp$"
        );
        // Dots inside literal segments are escaped.
        assert_eq!(pattern_regex("uns/v1.2/+"), "^uns\\.v1\\.2\\.[^.]+$");
    }

    async fn open_gate() -> Arc<AdmissionGate> {
        let topics = TopicValidator::new(TopicConfig::default());
        let security = Arc::new(
            SecurityManager::new(
                SecurityConfig {
                    enabled: false,
                    ..SecurityConfig::default()
                },
                SourcePaths::default(),
                topics.clone(),
            )
            .await
            .unwrap(),
        );
        let schemas =
            Arc::new(SchemaValidator::new(SchemaConfig::default(), topics.clone()).unwrap());
        Arc::new(AdmissionGate::new(topics, security, schemas))
    }

    #[tokio::test]
    async fn client_id_reaches_the_client_configuration() {
        let config = KafkaBrokerConfig {
            client_id: Some("uns-edge-7".to_string()),
            ..KafkaBrokerConfig::default()
        };
        let broker = KafkaBroker::new(config, open_gate().await);
        let client_config = broker.base_client_config();
        assert_eq!(client_config.get("client.id"), Some("uns-edge-7"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));

        let broker = KafkaBroker::new(KafkaBrokerConfig::default(), open_gate().await);
        assert_eq!(broker.base_client_config().get("client.id"), None);
    }

    #[tokio::test]
    async fn subscribe_requires_a_group_id() {
        let broker = KafkaBroker::new(KafkaBrokerConfig::default(), open_gate().await);
        let err = broker
            .subscribe("tester", "uns/acme/dallas/#", SubscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
    }

    #[tokio::test]
    async fn failed_subscription_releases_its_group_claim() {
        // Not started: the consumer can never come up, so the claim must be
        // released and the same group id must stay usable.
        let broker = KafkaBroker::new(KafkaBrokerConfig::default(), open_gate().await);
        let options = SubscribeOptions {
            group_id: Some("uns-line1".to_string()),
            ..SubscribeOptions::default()
        };

        let err = broker
            .subscribe("tester", "uns/acme/dallas/#", options.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TransportUnavailable(_)));

        let err = broker
            .subscribe("tester", "uns/acme/dallas/#", options)
            .await
            .unwrap_err();
        assert!(
            matches!(err, BrokerError::TransportUnavailable(_)),
            "second attempt must not be rejected as a duplicate group"
        );
    }

    #[tokio::test]
    async fn publish_without_start_is_unavailable() {
        let broker = KafkaBroker::new(KafkaBrokerConfig::default(), open_gate().await);
        let err = broker
            .publish(
                "tester",
                "uns/acme/dallas/temp",
                &UnsPayload::new(json!(20.1)),
                PublishOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TransportUnavailable(_)));
    }
}
