//! Canonical message envelope.
//!
//! Producers publish arbitrary JSON; conforming producers publish this
//! envelope so every consumer sees `{value, timestamp, quality, metadata}`
//! regardless of the originating field protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Data quality attached to a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Value is trustworthy
    #[default]
    Good,
    /// Source reported a fault
    Bad,
    /// Source could not vouch for the value
    Uncertain,
    /// Value has not been refreshed within its expected interval
    Stale,
}

/// Payload of a canonical namespace message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsPayload {
    /// The data point itself
    pub value: Value,
    /// Source timestamp (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Data quality indicator
    #[serde(default)]
    pub quality: Quality,
    /// Free-form metadata (units, source identifiers, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl UnsPayload {
    /// Wrap a value with the current timestamp and `good` quality.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            timestamp: Utc::now(),
            quality: Quality::Good,
            metadata: Map::new(),
        }
    }
}

/// A message addressed into the unified namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsMessage {
    /// Full hierarchical topic
    pub topic: String,
    /// Canonical payload
    pub payload: UnsPayload,
}

impl UnsMessage {
    /// Create a message with the current timestamp and `good` quality.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: Value) -> Self {
        Self {
            topic: topic.into(),
            payload: UnsPayload::new(value),
        }
    }

    /// Serialize the payload to JSON bytes for the wire.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn payload_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&self.payload).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Reassemble a message from a delivered topic and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a canonical envelope.
    pub fn from_wire(topic: impl Into<String>, payload: &[u8]) -> Result<Self, EnvelopeError> {
        let payload: UnsPayload =
            serde_json::from_slice(payload).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        Ok(Self {
            topic: topic.into(),
            payload,
        })
    }
}

/// Errors for envelope encoding/decoding.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    /// Serialization failed
    #[error("payload encoding failed: {0}")]
    Encode(String),
    /// Payload bytes are not a canonical envelope
    #[error("payload is not a canonical envelope: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_round_trip() {
        let mut message = UnsMessage::new("uns/acme/dallas/packaging", json!(23.5));
        message
            .payload
            .metadata
            .insert("unit".to_string(), json!("celsius"));

        let bytes = message.payload_bytes().unwrap();
        let decoded = UnsMessage::from_wire(&message.topic, &bytes).unwrap();

        assert_eq!(decoded, message);
    }

    #[test]
    fn quality_defaults_to_good() {
        let payload: UnsPayload = serde_json::from_value(json!({
            "value": 42,
            "timestamp": "2026-01-05T09:30:00Z"
        }))
        .unwrap();

        assert_eq!(payload.quality, Quality::Good);
        assert!(payload.metadata.is_empty());
    }

    #[test]
    fn quality_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(Quality::Uncertain).unwrap(),
            json!("uncertain")
        );
    }

    #[test]
    fn non_envelope_payload_is_an_error() {
        assert!(UnsMessage::from_wire("uns/acme/dallas", b"not json").is_err());
        assert!(UnsMessage::from_wire("uns/acme/dallas", b"{\"raw\":1}").is_err());
    }
}
