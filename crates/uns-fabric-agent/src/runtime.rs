//! Fabric runtime orchestration.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use uns_fabric_broker::{
    AdmissionGate, BrokerAdapter, BrokerKind, KafkaBroker, MqttBroker, SubscribeOptions,
    Subscription,
};
use uns_fabric_core::{TopicConfig, TopicValidator};
use uns_fabric_schema::SchemaValidator;
use uns_fabric_security::{ConnectionContext, SecurityConfig, SecurityManager, SourcePaths};

/// The main fabric runtime.
pub struct Fabric {
    config: AgentConfig,
}

impl Fabric {
    /// Create a new fabric runtime.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run the fabric until a shutdown signal arrives.
    ///
    /// SIGHUP reloads the credential and ACL tables without touching live
    /// sessions; Ctrl+C stops the broker backend and returns.
    ///
    /// # Errors
    ///
    /// Returns error if a component fails to initialize, the broker backend
    /// cannot start, or a configured subscription is refused.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting fabric runtime");

        let mut topic_config = TopicConfig::default();
        if let Some(root) = &self.config.root_namespace {
            topic_config.root_namespace = root.clone();
        }
        let topics = TopicValidator::new(topic_config);

        let security_config = match &self.config.security_config {
            Some(path) => SecurityConfig::from_file(path)
                .context("Failed to load security configuration")?,
            None => SecurityConfig::default(),
        };
        let sources = SourcePaths {
            credentials: self.config.credentials.clone(),
            acl: self.config.acl.clone(),
        };
        let security = Arc::new(
            SecurityManager::new(security_config, sources, topics.clone())
                .await
                .context("Failed to initialize security manager")?,
        );

        let schemas = SchemaValidator::new(self.config.schema.clone(), topics.clone())
            .context("Failed to initialize schema validator")?;
        if let Some(dir) = &self.config.schema_dir {
            let count = schemas
                .load_dir(dir)
                .await
                .with_context(|| format!("Failed to load schemas from {}", dir.display()))?;
            tracing::info!(count, dir = %dir.display(), "Schemas registered");
        }
        let schemas = Arc::new(schemas);

        let gate = Arc::new(AdmissionGate::new(topics, Arc::clone(&security), schemas));

        let mut adapter: Box<dyn BrokerAdapter> = match self.config.broker {
            BrokerKind::Mqtt => {
                Box::new(MqttBroker::new(self.config.mqtt.clone(), Arc::clone(&gate)))
            }
            BrokerKind::Kafka => {
                Box::new(KafkaBroker::new(self.config.kafka.clone(), Arc::clone(&gate)))
            }
        };
        adapter
            .start()
            .await
            .context("Failed to start broker backend")?;

        // The agent's own session, used for the configured subscriptions.
        let session = match (&self.config.username, &self.config.password) {
            (Some(username), Some(password)) => ConnectionContext::basic(username, password),
            _ => ConnectionContext::default(),
        };
        let principal = gate
            .authenticate(&session)
            .await
            .context("Agent session was not authenticated")?;

        for subscription in &self.config.subscriptions {
            let options = SubscribeOptions {
                group_id: subscription.group_id.clone(),
                ..SubscribeOptions::default()
            };
            let stream = adapter
                .subscribe(&principal, &subscription.pattern, options)
                .await
                .with_context(|| {
                    format!("Subscription to '{}' was refused", subscription.pattern)
                })?;
            tracing::info!(pattern = %subscription.pattern, "Mirroring namespace traffic");
            tokio::spawn(mirror(stream));
        }

        let mut hangup =
            signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    tracing::info!("Shutdown signal received");
                    break;
                }
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received; reloading security tables");
                    if security.reload_configuration().await {
                        tracing::info!("Security tables reloaded");
                    } else {
                        tracing::warn!("Security reload failed; previous tables remain active");
                    }
                }
            }
        }

        adapter.stop().await.context("Failed to stop broker backend")?;
        tracing::info!("Fabric stopped");
        Ok(())
    }
}

/// Log every delivery of a subscription until its stream closes.
async fn mirror(mut stream: Subscription) {
    while let Some(delivery) = stream.recv().await {
        tracing::info!(
            topic = %delivery.message.topic,
            value = %delivery.message.payload.value,
            quality = ?delivery.message.payload.quality,
            retained = delivery.retained,
            "Delivery"
        );
    }
    tracing::debug!("Subscription stream closed");
}
