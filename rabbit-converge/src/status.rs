//! Readiness conditions.
//!
//! Every resource carries one condition per sub-component plus the aggregate
//! `Ready`. Conditions are keyed by type: setting a condition replaces the
//! previous value of that type, so recomputing them on every pass never
//! accumulates entries. The transition timestamp only moves when the status
//! actually flips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate condition type.
pub const READY: &str = "Ready";

pub const VHOST_READY: &str = "VhostReady";
pub const POLICIES_READY: &str = "PoliciesReady";
pub const USER_READY: &str = "UserReady";
pub const PERMISSIONS_READY: &str = "PermissionsReady";
pub const QUEUE_READY: &str = "QueueReady";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Conditions of one resource, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    /// Status of a condition, `Unknown` when never set.
    pub fn status_of(&self, condition_type: &str) -> ConditionStatus {
        self.get(condition_type)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.status_of(condition_type) == ConditionStatus::True
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let reason = reason.into();
        let message = message.into();

        match self.0.iter_mut().find(|c| c.condition_type == condition_type) {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = Utc::now();
                }
                existing.reason = reason;
                existing.message = message;
            }
            None => self.0.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason,
                message,
                last_transition_time: Utc::now(),
            }),
        }
    }

    pub fn set_unknown(&mut self, condition_type: &str, reason: impl Into<String>) {
        self.set(condition_type, ConditionStatus::Unknown, reason, "");
    }

    pub fn set_true(
        &mut self,
        condition_type: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set(condition_type, ConditionStatus::True, reason, message);
    }

    pub fn set_false(
        &mut self,
        condition_type: &str,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.set(condition_type, ConditionStatus::False, reason, message);
    }

    /// Whether every listed condition is true.
    pub fn all_true(&self, condition_types: &[&str]) -> bool {
        condition_types.iter().all(|t| self.is_true(t))
    }

    /// First listed condition that is not true.
    pub fn first_not_true(&self, condition_types: &[&str]) -> Option<&Condition> {
        condition_types
            .iter()
            .find(|t| !self.is_true(t))
            .and_then(|t| self.get(t))
    }
}
