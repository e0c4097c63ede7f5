//! # UNS Fabric Core
//!
//! Topic model and canonical message envelope for the unified namespace.
//!
//! ## Topics
//!
//! Topic structure: `{root}/{enterprise}/{site}/{area}/{line}/{workcell}/{equipment}/{message_type}`
//!
//! Segments follow the ISA-95 equipment hierarchy. Depth is bounded (3-8 by
//! default), the first segment must equal the configured root namespace, and
//! subscriptions may use the MQTT wildcards `+` (one level) and `#` (trailing
//! remainder).
//!
//! ## Messages
//!
//! Every data point travelling through the namespace carries the canonical
//! envelope: a JSON value, an ISO-8601 timestamp, a quality indicator, and
//! free-form metadata.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod topic;

pub use message::{EnvelopeError, Quality, UnsMessage, UnsPayload};
pub use topic::{ParsedTopic, TopicConfig, TopicError, TopicValidator};
