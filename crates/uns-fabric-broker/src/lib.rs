//! # UNS Fabric Broker
//!
//! Transport adapters for the unified namespace. Both back ends expose the
//! same [`BrokerAdapter`] surface and run every publish and subscribe
//! through the same admission gate: topic shape, then authorization, then
//! payload schema.
//!
//! - [`MqttBroker`] embeds a rumqttd broker in-process, with an optional
//!   TLS listener on the derived port and a loopback client for the
//!   adapter surface.
//! - [`KafkaBroker`] speaks to an external Kafka cluster, auto-creating
//!   topics and mapping namespace topics onto Kafka naming.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod config;
pub mod gate;
pub mod kafka;
pub mod mqtt;

pub use adapter::{
    BrokerAdapter, BrokerError, Delivery, PublishOptions, QosLevel, SubscribeOptions,
    Subscription, SUBSCRIPTION_CAPACITY,
};
pub use config::{BrokerKind, KafkaBrokerConfig, MqttBrokerConfig};
pub use gate::AdmissionGate;
pub use kafka::KafkaBroker;
pub use mqtt::MqttBroker;
