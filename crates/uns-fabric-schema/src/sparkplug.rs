//! Built-in Sparkplug-B-compatible payload schema.
//!
//! Covers the JSON rendering of a Sparkplug B payload: a millisecond
//! timestamp, a metrics array, and an optional 0-255 sequence number. Used as
//! the fallback schema for topics with no registered schema when the fallback
//! is enabled.

use serde_json::{json, Value};

/// Schema id under which the fallback is registered.
pub const SPARKPLUG_SCHEMA_ID: &str = "sparkplug-b";

/// The Sparkplug-B-compatible default schema.
#[must_use]
pub fn sparkplug_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Sparkplug B payload",
        "type": "object",
        "properties": {
            "timestamp": { "type": "integer", "minimum": 0 },
            "metrics": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "alias": { "type": "integer", "minimum": 0 },
                        "timestamp": { "type": "integer", "minimum": 0 },
                        "dataType": { "type": "string" },
                        "value": {}
                    },
                    "required": ["name", "value"]
                }
            },
            "seq": { "type": "integer", "minimum": 0, "maximum": 255 }
        },
        "required": ["timestamp", "metrics"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparkplug_schema_compiles() {
        assert!(jsonschema::options()
            .should_validate_formats(true)
            .build(&sparkplug_schema())
            .is_ok());
    }

    #[test]
    fn accepts_a_typical_device_payload() {
        let validator = jsonschema::options().build(&sparkplug_schema()).unwrap();
        let payload = json!({
            "timestamp": 1_767_000_000_000_u64,
            "metrics": [
                { "name": "temperature", "dataType": "Double", "value": 23.5 },
                { "name": "running", "dataType": "Boolean", "value": true }
            ],
            "seq": 7
        });
        assert!(validator.validate(&payload).is_ok());
    }

    #[test]
    fn rejects_payload_without_metrics() {
        let validator = jsonschema::options().build(&sparkplug_schema()).unwrap();
        let payload = json!({ "timestamp": 1_767_000_000_000_u64 });
        assert!(validator.validate(&payload).is_err());
    }
}
