//! Broker adapter contract.
//!
//! Both transports expose the same surface: start, stop, admission-checked
//! publish/subscribe, and explicit topic creation. Deliveries arrive over a
//! per-subscription channel owned by the returned [`Subscription`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use uns_fabric_core::{EnvelopeError, TopicError, UnsMessage, UnsPayload};
use uns_fabric_schema::SchemaError;
use uns_fabric_security::AuthError;
use uuid::Uuid;

/// Bound on undelivered messages buffered per subscription.
///
/// Overflow handling is transport specific: the MQTT fan-out shares one
/// event loop and drops the delivery with a warning, while each Kafka
/// subscription owns its consumer and pauses it until the buffer drains.
pub const SUBSCRIPTION_CAPACITY: usize = 100;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosLevel {
    /// Fire and forget
    AtMostOnce,
    /// Acknowledged delivery
    #[default]
    AtLeastOnce,
    /// Exactly-once handshake
    ExactlyOnce,
}

/// Caller-supplied publish flags, passed through to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishOptions {
    /// Delivery guarantee
    pub qos: QosLevel,
    /// Retain flag (MQTT only; ignored by Kafka)
    pub retain: bool,
}

/// Caller-supplied subscription flags.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Delivery guarantee
    pub qos: QosLevel,
    /// Consumer-group id; required by Kafka, ignored by MQTT
    pub group_id: Option<String>,
}

/// One message handed to a subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic and decoded envelope
    pub message: UnsMessage,
    /// Delivery guarantee the transport reported
    pub qos: QosLevel,
    /// Whether the transport flagged the message as retained
    pub retained: bool,
}

/// An active subscription.
///
/// Buffers up to [`SUBSCRIPTION_CAPACITY`] deliveries; consume promptly to
/// stay within that bound. Dropping the subscription closes its channel;
/// the owning adapter notices and releases the transport-side resources.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    pattern: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(id: Uuid, pattern: String, receiver: mpsc::Receiver<Delivery>) -> Self {
        Self {
            id,
            pattern,
            receiver,
        }
    }

    /// Unique id of this subscription.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Topic or pattern this subscription was created with.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next delivery, or `None` once the adapter has stopped.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// Common surface of the MQTT and Kafka transports.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Bring the transport up.
    ///
    /// # Errors
    ///
    /// Returns error when the transport cannot be reached or is already
    /// running.
    async fn start(&mut self) -> Result<(), BrokerError>;

    /// Tear down this adapter's transport surface.
    ///
    /// # Errors
    ///
    /// Returns error when teardown fails partway.
    async fn stop(&mut self) -> Result<(), BrokerError>;

    /// Publish an envelope after topic, authorization and schema admission.
    ///
    /// # Errors
    ///
    /// Returns the admission failure or a transport error.
    async fn publish(
        &self,
        principal: &str,
        topic: &str,
        payload: &UnsPayload,
        options: PublishOptions,
    ) -> Result<(), BrokerError>;

    /// Subscribe to a topic or wildcard pattern after admission.
    ///
    /// # Errors
    ///
    /// Returns the admission failure or a transport error.
    async fn subscribe(
        &self,
        principal: &str,
        pattern: &str,
        options: SubscribeOptions,
    ) -> Result<Subscription, BrokerError>;

    /// Ensure a topic exists, creating it when the transport requires that.
    ///
    /// # Errors
    ///
    /// Returns the admission failure or a transport error.
    async fn create_topic(&self, principal: &str, topic: &str) -> Result<(), BrokerError>;
}

/// Errors for broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Topic or pattern failed shape validation
    #[error("invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
    /// Payload failed schema admission (missing schema, violation, or
    /// unparseable payload)
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Connection credentials were rejected
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthError),
    /// Principal lacks a grant for the requested action
    #[error("authorization denied: {principal} may not {action} {topic}")]
    AuthorizationDenied {
        /// Principal that was denied
        principal: String,
        /// Action that was requested
        action: String,
        /// Topic or pattern it was requested on
        topic: String,
    },
    /// Envelope failed to encode or decode
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Transport cannot be reached or refused the operation
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    /// Consumer-group id already active in this process
    #[error("consumer group '{0}' is already active")]
    DuplicateConsumerGroup(String),
    /// Adapter or transport configuration is unusable
    #[error("configuration error: {0}")]
    Configuration(String),
}
