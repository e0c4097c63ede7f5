//! Bounded in-memory audit log.
//!
//! Every security-relevant decision leaves exactly one event here. The log is
//! a ring: once capacity is reached the oldest events fall off. Persistence
//! is deliberately out of scope; an external sink can drain `recent`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Category of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Authentication attempt
    Authentication,
    /// Authorization decision
    Authorization,
    /// Client-certificate validation
    CertificateValidation,
    /// Administrative table mutation
    AdminAction,
    /// Configuration reload
    ConfigReload,
    /// Publish/subscribe rejected before reaching the transport
    Rejection,
}

/// One audit event.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Event category
    pub kind: AuditKind,
    /// Whether the operation was allowed
    pub allowed: bool,
    /// Principal involved, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Topic involved, when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Action involved (`read`/`write`/`subscribe`), when any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Originating component, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Human-readable outcome
    pub detail: String,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(kind: AuditKind, allowed: bool, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            allowed,
            principal: None,
            topic: None,
            action: None,
            source: None,
            detail: detail.into(),
        }
    }

    /// Attach the principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Attach the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Attach the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach the originating component.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Bounded audit ring buffer.
pub struct AuditLog {
    capacity: usize,
    events: RwLock<VecDeque<AuditEvent>>,
}

impl AuditLog {
    /// Create a log holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append an event, evicting the oldest once full.
    pub async fn record(&self, event: AuditEvent) {
        tracing::debug!(
            kind = ?event.kind,
            allowed = event.allowed,
            principal = event.principal.as_deref(),
            topic = event.topic.as_deref(),
            detail = %event.detail,
            "Audit event"
        );

        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// The most recent `n` events, oldest first.
    pub async fn recent(&self, n: usize) -> Vec<AuditEvent> {
        let events = self.events.read().await;
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }

    /// Number of retained events.
    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Whether the log holds no events.
    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ring_evicts_oldest_events() {
        let log = AuditLog::new(3);
        for i in 0..5 {
            log.record(AuditEvent::new(
                AuditKind::Authorization,
                true,
                format!("event {i}"),
            ))
            .await;
        }

        assert_eq!(log.len().await, 3);
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].detail, "event 2");
        assert_eq!(recent[2].detail, "event 4");
    }

    #[tokio::test]
    async fn recent_returns_the_tail_in_order() {
        let log = AuditLog::new(10);
        for i in 0..4 {
            log.record(AuditEvent::new(
                AuditKind::Authentication,
                false,
                format!("attempt {i}"),
            ))
            .await;
        }

        let recent = log.recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].detail, "attempt 2");
        assert_eq!(recent[1].detail, "attempt 3");
    }

    #[tokio::test]
    async fn event_builder_attaches_fields() {
        let event = AuditEvent::new(AuditKind::Rejection, false, "schema violation")
            .with_principal("op1")
            .with_topic("uns/acme/dallas")
            .with_action("write")
            .with_source("mqtt");

        assert_eq!(event.principal.as_deref(), Some("op1"));
        assert_eq!(event.topic.as_deref(), Some("uns/acme/dallas"));
        assert_eq!(event.action.as_deref(), Some("write"));
        assert_eq!(event.source.as_deref(), Some("mqtt"));
        assert!(!event.allowed);
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped() {
        let log = AuditLog::new(0);
        log.record(AuditEvent::new(AuditKind::ConfigReload, true, "reload"))
            .await;
        assert_eq!(log.len().await, 1);
    }
}
