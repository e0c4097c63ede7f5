//! ISA-95 topic validation, parsing, and wildcard matching.
//!
//! Topic structure: `{root}/{enterprise}/{site}/{area}/{line}/{workcell}/{equipment}/{message_type}`
//!
//! Only the first three levels are mandatory; trailing levels are optional.
//! Reserved prefixes (`$SYS`, `internal`) are exempt from hierarchy rules so
//! broker housekeeping traffic is never rejected.

use serde::{Deserialize, Serialize};

/// Names of the ISA-95 hierarchy levels, in positional order.
pub const LEVEL_NAMES: [&str; 8] = [
    "namespace",
    "enterprise",
    "site",
    "area",
    "line",
    "workcell",
    "equipment",
    "message_type",
];

/// Topic validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Required first segment of every hierarchical topic
    pub root_namespace: String,
    /// Minimum number of segments
    pub min_depth: usize,
    /// Maximum number of segments
    pub max_depth: usize,
    /// Enforce the root-namespace check
    pub enforce_hierarchy: bool,
    /// Topic prefixes exempt from all hierarchy rules
    pub reserved_prefixes: Vec<String>,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            root_namespace: "uns".to_string(),
            min_depth: 3,
            max_depth: 8,
            enforce_hierarchy: true,
            reserved_prefixes: vec!["$SYS".to_string(), "internal".to_string()],
        }
    }
}

/// A topic decomposed into named ISA-95 levels.
///
/// Levels are assigned positionally up to the topic's depth; trailing levels
/// that are not present in the topic stay `None`. The same struct is the
/// input to [`TopicValidator::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTopic {
    /// Root namespace (level 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Enterprise (level 2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise: Option<String>,
    /// Site (level 3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Area (level 4)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    /// Production line (level 5)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
    /// Work cell (level 6)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workcell: Option<String>,
    /// Equipment (level 7)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment: Option<String>,
    /// Message type (level 8)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

impl ParsedTopic {
    fn slots(&self) -> [&Option<String>; 8] {
        [
            &self.namespace,
            &self.enterprise,
            &self.site,
            &self.area,
            &self.line,
            &self.workcell,
            &self.equipment,
            &self.message_type,
        ]
    }

    /// Number of contiguous leading levels that are present.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.slots().iter().take_while(|slot| slot.is_some()).count()
    }
}

/// Validator for unified-namespace topics.
#[derive(Debug, Clone, Default)]
pub struct TopicValidator {
    config: TopicConfig,
}

impl TopicValidator {
    /// Create a validator with the given configuration.
    #[must_use]
    pub fn new(config: TopicConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    /// Whether the topic falls under a reserved prefix.
    #[must_use]
    pub fn is_reserved(&self, topic: &str) -> bool {
        self.config
            .reserved_prefixes
            .iter()
            .any(|prefix| topic.starts_with(prefix.as_str()))
    }

    /// Validate a topic or subscription pattern.
    ///
    /// Reserved-prefixed topics always pass. Wildcard segments (`+`, `#`) are
    /// only accepted when `allow_wildcards` is set, and `#` must be the final
    /// segment.
    ///
    /// # Errors
    ///
    /// Returns the first rule the topic violates.
    pub fn validate(&self, topic: &str, allow_wildcards: bool) -> Result<(), TopicError> {
        if topic.trim().is_empty() {
            return Err(TopicError::Empty);
        }

        if self.is_reserved(topic) {
            return Ok(());
        }

        if topic.starts_with('/') || topic.ends_with('/') {
            return Err(TopicError::EdgeSlash);
        }

        let segments: Vec<&str> = topic.split('/').collect();
        let depth = segments.len();

        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(TopicError::EmptySegment);
        }

        if depth < self.config.min_depth || depth > self.config.max_depth {
            return Err(TopicError::Depth {
                depth,
                min: self.config.min_depth,
                max: self.config.max_depth,
            });
        }

        if self.config.enforce_hierarchy && segments[0] != self.config.root_namespace {
            return Err(TopicError::RootMismatch {
                root: self.config.root_namespace.clone(),
            });
        }

        for (index, segment) in segments.iter().enumerate() {
            match *segment {
                "#" => {
                    if !allow_wildcards {
                        return Err(TopicError::WildcardNotAllowed);
                    }
                    if index + 1 != depth {
                        return Err(TopicError::MultiLevelNotFinal);
                    }
                }
                "+" => {
                    if !allow_wildcards {
                        return Err(TopicError::WildcardNotAllowed);
                    }
                }
                literal => {
                    if !literal.chars().all(is_segment_char) {
                        return Err(TopicError::InvalidSegment {
                            segment: (*segment).to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Decompose a topic into named ISA-95 levels.
    ///
    /// Returns `None` for reserved-prefixed or invalid topics.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<ParsedTopic> {
        if self.is_reserved(topic) {
            return None;
        }
        self.validate(topic, false).ok()?;

        let segments: Vec<&str> = topic.split('/').collect();
        let level = |index: usize| segments.get(index).map(|s| (*s).to_string());

        Some(ParsedTopic {
            namespace: level(0),
            enterprise: level(1),
            site: level(2),
            area: level(3),
            line: level(4),
            workcell: level(5),
            equipment: level(6),
            message_type: level(7),
        })
    }

    /// Assemble a topic string from named levels.
    ///
    /// Requires at least namespace, enterprise, and site. Appending stops at
    /// the first absent level, so gaps never produce malformed topics.
    /// Returns `None` when the assembled topic fails validation.
    #[must_use]
    pub fn build(&self, levels: &ParsedTopic) -> Option<String> {
        let mut segments: Vec<&str> = Vec::with_capacity(8);
        for slot in levels.slots() {
            match slot {
                Some(segment) => segments.push(segment.as_str()),
                None => break,
            }
        }

        if segments.len() < 3 {
            return None;
        }

        let topic = segments.join("/");
        self.validate(&topic, false).ok()?;
        Some(topic)
    }

    /// Match a subscription pattern against a concrete topic.
    ///
    /// Both sides must validate on their own (the pattern with wildcards, the
    /// topic without); anything else is a non-match, never an error.
    #[must_use]
    pub fn matches(&self, pattern: &str, topic: &str) -> bool {
        if self.validate(pattern, true).is_err() || self.validate(topic, false).is_err() {
            return false;
        }
        segments_match(pattern, topic)
    }

    /// Decide whether a granted pattern covers a requested subscription.
    ///
    /// Used when the requested side may itself contain wildcards: a literal
    /// request level is covered by the same literal or a wildcard, `+` only
    /// by `+`, and `#` only by `#`. A grant can therefore never be widened by
    /// subscribing with a broader wildcard. For wildcard-free requests this
    /// is the same relation as [`Self::matches`].
    #[must_use]
    pub fn covers(&self, grant: &str, requested: &str) -> bool {
        if self.validate(grant, true).is_err() || self.validate(requested, true).is_err() {
            return false;
        }

        let grant_segments: Vec<&str> = grant.split('/').collect();
        let requested_segments: Vec<&str> = requested.split('/').collect();

        let mut index = 0;
        for grant_segment in &grant_segments {
            if *grant_segment == "#" {
                return true;
            }
            let Some(requested_segment) = requested_segments.get(index) else {
                return false;
            };
            let covered = match *grant_segment {
                "+" => *requested_segment != "#",
                literal => *requested_segment == literal,
            };
            if !covered {
                return false;
            }
            index += 1;
        }

        index == requested_segments.len()
    }
}

/// Whether the string contains any wildcard segment.
#[must_use]
pub fn has_wildcards(topic: &str) -> bool {
    topic.split('/').any(|segment| segment == "+" || segment == "#")
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn segments_match(pattern: &str, topic: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    let mut index = 0;
    for pattern_segment in &pattern_segments {
        if *pattern_segment == "#" {
            return true;
        }
        let Some(topic_segment) = topic_segments.get(index) else {
            // Pattern has levels left but the topic is exhausted.
            return false;
        };
        if *pattern_segment != "+" && pattern_segment != topic_segment {
            return false;
        }
        index += 1;
    }

    index == topic_segments.len()
}

/// Errors for topic validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// Topic is empty or blank
    #[error("topic is empty")]
    Empty,
    /// Topic starts or ends with a separator
    #[error("topic must not start or end with '/'")]
    EdgeSlash,
    /// Topic contains a zero-length segment
    #[error("topic contains an empty segment")]
    EmptySegment,
    /// Segment count outside the configured bounds
    #[error("topic has {depth} levels, expected between {min} and {max}")]
    Depth {
        /// Observed segment count
        depth: usize,
        /// Configured minimum
        min: usize,
        /// Configured maximum
        max: usize,
    },
    /// First segment does not match the root namespace
    #[error("topic must start with the root namespace '{root}'")]
    RootMismatch {
        /// Configured root namespace
        root: String,
    },
    /// `#` used before the final segment
    #[error("multi-level wildcard '#' is only allowed as the final segment")]
    MultiLevelNotFinal,
    /// Wildcard present where only concrete topics are accepted
    #[error("wildcards are not allowed in this context")]
    WildcardNotAllowed,
    /// Segment contains characters outside `[A-Za-z0-9_.-]`
    #[error("segment '{segment}' contains invalid characters")]
    InvalidSegment {
        /// Offending segment
        segment: String,
    },
}
