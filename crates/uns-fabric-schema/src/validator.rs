//! Schema registry and topic-routed payload validation.

use crate::sparkplug::{sparkplug_schema, SPARKPLUG_SCHEMA_ID};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uns_fabric_core::TopicValidator;

/// Schema validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaConfig {
    /// Master switch; disabled means every payload passes
    pub enabled: bool,
    /// Reject payloads for topics with no schema (instead of accepting them)
    pub strict: bool,
    /// Fall back to the built-in Sparkplug-B schema for unmatched topics
    pub sparkplug_fallback: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            sparkplug_fallback: false,
        }
    }
}

/// A schema registration: one schema, routed from one or more topic patterns.
///
/// This is also the on-disk form, one JSON document per file in the schema
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaEntry {
    /// Registry identifier
    pub id: String,
    /// JSON Schema document
    pub schema: Value,
    /// Topic patterns routed to this schema (plain or wildcard)
    #[serde(default)]
    pub topic_patterns: Vec<String>,
}

/// Outcome of validating one payload, for reporting surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// Whether the payload was accepted
    pub valid: bool,
    /// Schema consulted, if any
    pub schema_id: Option<String>,
    /// Field-level violation messages
    pub errors: Vec<String>,
}

struct Binding {
    pattern: String,
    schema_id: String,
}

#[derive(Default)]
struct SchemaTables {
    schemas: HashMap<String, Value>,
    bindings: Vec<Binding>,
    compiled: HashMap<String, Arc<jsonschema::Validator>>,
}

/// Topic-routed payload validator.
///
/// Resolution order for a topic: exact pattern match, first registered
/// wildcard pattern that matches, Sparkplug-B fallback (when enabled). With
/// no match, strict mode rejects and lenient mode accepts.
pub struct SchemaValidator {
    config: SchemaConfig,
    topics: TopicValidator,
    tables: RwLock<SchemaTables>,
}

impl SchemaValidator {
    /// Create a validator; compiles the built-in fallback schema.
    ///
    /// # Errors
    ///
    /// Returns error if the fallback schema fails to compile.
    pub fn new(config: SchemaConfig, topics: TopicValidator) -> Result<Self, SchemaError> {
        let mut tables = SchemaTables::default();
        let fallback = sparkplug_schema();
        tables.compiled.insert(
            SPARKPLUG_SCHEMA_ID.to_string(),
            Arc::new(compile(SPARKPLUG_SCHEMA_ID, &fallback)?),
        );
        tables
            .schemas
            .insert(SPARKPLUG_SCHEMA_ID.to_string(), fallback);

        Ok(Self {
            config,
            topics,
            tables: RwLock::new(tables),
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Register (or replace) a schema and bind its topic patterns.
    ///
    /// The schema is compiled immediately, so malformed schemas fail here
    /// rather than on first use. Re-binding an existing pattern re-points it
    /// to the new schema id; re-registering an id replaces the schema while
    /// keeping previously bound patterns.
    ///
    /// # Errors
    ///
    /// Returns error if the schema does not compile.
    pub async fn add_schema(&self, entry: SchemaEntry) -> Result<(), SchemaError> {
        let compiled = Arc::new(compile(&entry.id, &entry.schema)?);

        for pattern in &entry.topic_patterns {
            if self.topics.validate(pattern, true).is_err() {
                tracing::warn!(
                    schema_id = %entry.id,
                    pattern = %pattern,
                    "Schema pattern does not validate and will never match"
                );
            }
        }

        let mut tables = self.tables.write().await;
        tables.compiled.insert(entry.id.clone(), compiled);
        tables.schemas.insert(entry.id.clone(), entry.schema);
        for pattern in entry.topic_patterns {
            match tables
                .bindings
                .iter_mut()
                .find(|binding| binding.pattern == pattern)
            {
                Some(binding) => binding.schema_id = entry.id.clone(),
                None => tables.bindings.push(Binding {
                    pattern,
                    schema_id: entry.id.clone(),
                }),
            }
        }

        tracing::info!(schema_id = %entry.id, "Registered schema");
        Ok(())
    }

    /// Remove a schema and every pattern bound to it.
    ///
    /// Returns `false` when the id was not registered.
    pub async fn remove_schema(&self, id: &str) -> bool {
        let mut tables = self.tables.write().await;
        let existed = tables.schemas.remove(id).is_some();
        tables.compiled.remove(id);
        tables.bindings.retain(|binding| binding.schema_id != id);

        if existed {
            tracing::info!(schema_id = %id, "Removed schema");
        }
        existed
    }

    /// Load every `*.json` schema entry from a directory, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read or any entry is
    /// malformed; intended to abort startup.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, SchemaError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| SchemaError::Source(format!("{}: {e}", dir.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let bytes = std::fs::read(&path)
                .map_err(|e| SchemaError::Source(format!("{}: {e}", path.display())))?;
            let entry: SchemaEntry = serde_json::from_slice(&bytes)
                .map_err(|e| SchemaError::Source(format!("{}: {e}", path.display())))?;
            self.add_schema(entry).await?;
            loaded += 1;
        }

        tracing::info!(dir = %dir.display(), loaded, "Loaded schema directory");
        Ok(loaded)
    }

    /// Registered schema ids, sorted.
    pub async fn schema_ids(&self) -> Vec<String> {
        let tables = self.tables.read().await;
        let mut ids: Vec<String> = tables.schemas.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Validate a payload value, returning the resolved schema id.
    ///
    /// `Ok(None)` means no schema was consulted (validation disabled, or no
    /// match in lenient mode).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Violation`] when the payload fails the resolved
    /// schema and [`SchemaError::NotFound`] when no schema matches in strict
    /// mode.
    pub async fn check_value(
        &self,
        topic: &str,
        payload: &Value,
    ) -> Result<Option<String>, SchemaError> {
        if !self.config.enabled {
            return Ok(None);
        }

        if let Some((schema_id, validator)) = self.resolve(topic).await {
            run_validator(&schema_id, &validator, payload)?;
            return Ok(Some(schema_id));
        }

        if self.config.sparkplug_fallback {
            let fallback = {
                let tables = self.tables.read().await;
                tables.compiled.get(SPARKPLUG_SCHEMA_ID).cloned()
            };
            if let Some(validator) = fallback {
                run_validator(SPARKPLUG_SCHEMA_ID, &validator, payload)?;
                return Ok(Some(SPARKPLUG_SCHEMA_ID.to_string()));
            }
        }

        if self.config.strict {
            return Err(SchemaError::NotFound {
                topic: topic.to_string(),
            });
        }

        Ok(None)
    }

    /// Validate raw payload bytes (JSON), returning the resolved schema id.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Payload`] when the bytes are not JSON, plus
    /// everything [`Self::check_value`] returns.
    pub async fn check_bytes(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<Option<String>, SchemaError> {
        if !self.config.enabled {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| SchemaError::Payload(e.to_string()))?;
        self.check_value(topic, &value).await
    }

    /// Reporting form of [`Self::check_value`].
    pub async fn validate_value(&self, topic: &str, payload: &Value) -> ValidationReport {
        report(self.check_value(topic, payload).await)
    }

    /// Reporting form of [`Self::check_bytes`].
    pub async fn validate_bytes(&self, topic: &str, payload: &[u8]) -> ValidationReport {
        report(self.check_bytes(topic, payload).await)
    }

    async fn resolve(&self, topic: &str) -> Option<(String, Arc<jsonschema::Validator>)> {
        let tables = self.tables.read().await;
        let binding = tables
            .bindings
            .iter()
            .find(|binding| binding.pattern == topic)
            .or_else(|| {
                tables
                    .bindings
                    .iter()
                    .find(|binding| self.topics.matches(&binding.pattern, topic))
            })?;
        let validator = tables.compiled.get(&binding.schema_id)?.clone();
        Some((binding.schema_id.clone(), validator))
    }
}

fn compile(id: &str, schema: &Value) -> Result<jsonschema::Validator, SchemaError> {
    jsonschema::options()
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| SchemaError::Compile {
            id: id.to_string(),
            message: e.to_string(),
        })
}

fn run_validator(
    schema_id: &str,
    validator: &jsonschema::Validator,
    payload: &Value,
) -> Result<(), SchemaError> {
    let errors: Vec<String> = validator
        .iter_errors(payload)
        .map(|error| {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                format!("$: {error}")
            } else {
                format!("${path}: {error}")
            }
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::Violation {
            schema_id: schema_id.to_string(),
            errors,
        })
    }
}

fn report(outcome: Result<Option<String>, SchemaError>) -> ValidationReport {
    match outcome {
        Ok(schema_id) => ValidationReport {
            valid: true,
            schema_id,
            errors: Vec::new(),
        },
        Err(SchemaError::Violation { schema_id, errors }) => ValidationReport {
            valid: false,
            schema_id: Some(schema_id),
            errors,
        },
        Err(err) => ValidationReport {
            valid: false,
            schema_id: None,
            errors: vec![err.to_string()],
        },
    }
}

/// Errors for schema registration and validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    /// No schema matches and strict mode is active
    #[error("no schema registered for topic '{topic}'")]
    NotFound {
        /// Topic that failed to resolve
        topic: String,
    },
    /// Payload rejected by the resolved schema
    #[error("payload rejected by schema '{schema_id}': {}", errors.join("; "))]
    Violation {
        /// Schema that rejected the payload
        schema_id: String,
        /// Field-level violation messages
        errors: Vec<String>,
    },
    /// Payload bytes are not parseable JSON
    #[error("payload is not valid JSON: {0}")]
    Payload(String),
    /// Schema document does not compile
    #[error("schema '{id}' does not compile: {message}")]
    Compile {
        /// Offending schema id
        id: String,
        /// Compiler message
        message: String,
    },
    /// Declarative schema source could not be loaded
    #[error("schema source error: {0}")]
    Source(String),
}
