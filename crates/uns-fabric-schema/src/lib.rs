//! # UNS Fabric Schema
//!
//! Topic-routed JSON Schema validation for namespace payloads.
//!
//! Schemas are registered against topic patterns (plain or wildcard). For an
//! incoming message the registry resolves, in order: an exact pattern match,
//! the first registered wildcard pattern that matches, then the built-in
//! Sparkplug-B-compatible default (when enabled). With no match the outcome
//! depends on strict mode: reject or accept.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sparkplug;
pub mod validator;

pub use sparkplug::SPARKPLUG_SCHEMA_ID;
pub use validator::{SchemaConfig, SchemaEntry, SchemaError, SchemaValidator, ValidationReport};
