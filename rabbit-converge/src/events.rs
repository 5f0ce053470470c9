//! Change notifications.
//!
//! An event is emitted for every successful broker mutation and for nothing
//! else. Failures surface through conditions and logs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::resource::ObjectKey;

/// Maximum events retained by an [`EventLog`] before pruning.
const MAX_EVENTS: usize = 1_000;

/// Only successful mutations are announced, so every event is `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub event_id: String,
    /// Object the event is about
    pub object: ObjectKey,
    pub event_type: EventType,
    /// Machine readable reason, e.g. `UserCreated`
    pub reason: String,
    /// Human readable message
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn normal(object: ObjectKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            object,
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// Bounded in-memory event history, newest first.
pub struct EventLog {
    entries: Arc<RwLock<VecDeque<Event>>>,
    max_entries: usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_max_entries(MAX_EVENTS)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::new())),
            max_entries,
        }
    }

    /// Most recent events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<Event> {
        let entries = self.entries.read().await;
        entries.iter().take(limit).cloned().collect()
    }

    /// All retained events in emission order.
    pub async fn all(&self) -> Vec<Event> {
        let entries = self.entries.read().await;
        entries.iter().rev().cloned().collect()
    }

    /// Events about one object, in emission order.
    pub async fn for_object(&self, object: &ObjectKey) -> Vec<Event> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| &e.object == object)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn emit(&self, event: Event) {
        info!(
            object = %event.object,
            reason = %event.reason,
            "{}",
            event.message
        );

        let mut entries = self.entries.write().await;
        entries.push_front(event);

        while entries.len() > self.max_entries {
            entries.pop_back();
        }
    }
}
