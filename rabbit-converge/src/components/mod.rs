//! Per-kind convergence components.
//!
//! Each component owns one readiness condition. It marks that condition
//! `Unknown` on entry, fetches observed state through the management API,
//! applies the difference, and marks the condition `True` on success. An
//! error leaves the condition `Unknown` for the reconciler to resolve.

use std::time::Duration;

use rabbit_admin::ApiResponse;

use crate::config::EngineConfig;
use crate::error::ConvergeError;
use crate::events::{Event, EventSink};
use crate::resource::ObjectKey;
use crate::status::Conditions;

pub mod permissions;
pub mod policies;
pub mod queue;
pub mod user;
pub mod vhost;

/// Status answered when an object is first created.
pub(crate) const CREATED: &[u16] = &[201];
/// Statuses accepted for a create-or-update call.
pub(crate) const UPSERTED: &[u16] = &[200, 201, 204];
/// Statuses accepted for a delete; a missing object is already gone.
pub(crate) const DELETED: &[u16] = &[200, 204, 404];

/// Mutable state threaded through the components of one pass.
pub struct PassContext<'a> {
    /// Object being reconciled
    pub object: &'a ObjectKey,
    pub conditions: &'a mut Conditions,
    pub events: &'a dyn EventSink,
    pub config: &'a EngineConfig,
    /// Successful broker mutations so far
    pub changes: usize,
}

impl<'a> PassContext<'a> {
    pub fn new(
        object: &'a ObjectKey,
        conditions: &'a mut Conditions,
        events: &'a dyn EventSink,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            object,
            conditions,
            events,
            config,
            changes: 0,
        }
    }

    /// Record a successful mutation and emit its event.
    pub async fn record(&mut self, reason: &str, message: String) {
        self.changes += 1;
        self.events
            .emit(Event::normal(self.object.clone(), reason, message))
            .await;
    }
}

/// What a component asks of the rest of the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Step {
    /// Re-run the pass after this delay
    pub requeue_after: Option<Duration>,
    /// Skip the components that follow
    pub skip_remaining: bool,
}

impl Step {
    pub fn done() -> Self {
        Self::default()
    }

    /// Stop here and come back after `after`.
    pub fn settle(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            skip_remaining: true,
        }
    }

    /// Carry on but come back after `after`.
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
            skip_remaining: false,
        }
    }

    /// Merge two steps, keeping the sooner requeue.
    pub fn and(self, other: Step) -> Step {
        let requeue_after = match (self.requeue_after, other.requeue_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Step {
            requeue_after,
            skip_remaining: self.skip_remaining || other.skip_remaining,
        }
    }
}

/// Fail unless a mutating call answered one of `expected`.
pub(crate) fn expect_status(
    response: &ApiResponse,
    expected: &[u16],
    action: impl FnOnce() -> String,
) -> Result<(), ConvergeError> {
    if response.is_one_of(expected) {
        return Ok(());
    }
    Err(unexpected(response, action()))
}

/// Fail unless a mutating call answered any 2xx status.
pub(crate) fn expect_success(
    response: &ApiResponse,
    action: impl FnOnce() -> String,
) -> Result<(), ConvergeError> {
    if response.is_success() {
        return Ok(());
    }
    Err(unexpected(response, action()))
}

fn unexpected(response: &ApiResponse, action: String) -> ConvergeError {
    let reason = response.reason();
    if reason.is_empty() {
        ConvergeError::Dependency(format!(
            "{}, got response code {}",
            action, response.status
        ))
    } else {
        ConvergeError::Dependency(format!(
            "{}, got response code {}: {}",
            action, response.status, reason
        ))
    }
}
