//! Error taxonomy for convergence passes.

use std::fmt::Display;
use std::time::Duration;

use crate::config::EngineConfig;

/// Error types for convergence operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvergeError {
    /// Bad spec or missing required default. Not retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Broker or secret store unreachable, or an unexpected response.
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Observed state diverges from an immutable spec field.
    #[error("{subject} settings do not match: {}", .diffs.join(", "))]
    Drift { subject: String, diffs: Vec<String> },

    /// Rejected at admission, before any broker call.
    #[error("validation error: {0}")]
    Validation(String),
}

impl ConvergeError {
    /// Wrap a failure from a collaborator with the context of what was
    /// being attempted.
    pub fn dependency(context: impl Display, err: impl Display) -> Self {
        ConvergeError::Dependency(format!("{}: {}", context, err))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ConvergeError::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ConvergeError::Validation(message.into())
    }

    /// Whether the external scheduler should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConvergeError::Dependency(_) | ConvergeError::Drift { .. }
        )
    }

    /// Delay before the next attempt, `None` for fatal errors.
    pub fn requeue_after(&self, config: &EngineConfig) -> Option<Duration> {
        match self {
            ConvergeError::Drift { .. } => Some(config.drift_requeue()),
            ConvergeError::Dependency(_) => Some(config.retry_requeue()),
            ConvergeError::Configuration(_) | ConvergeError::Validation(_) => None,
        }
    }

    /// Condition reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            ConvergeError::Configuration(_) => "ConfigurationError",
            ConvergeError::Dependency(_) => "DependencyError",
            ConvergeError::Drift { .. } => "DriftDetected",
            ConvergeError::Validation(_) => "ValidationError",
        }
    }
}

impl From<crate::capability::StoreError> for ConvergeError {
    fn from(err: crate::capability::StoreError) -> Self {
        ConvergeError::Dependency(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_message_joins_diffs() {
        let err = ConvergeError::Drift {
            subject: "queue orders on vhost testing".to_string(),
            diffs: vec![
                "Durable currently false expecting true".to_string(),
                "Argument x-max-priority currently 20 expecting 10".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "queue orders on vhost testing settings do not match: Durable currently false expecting true, Argument x-max-priority currently 20 expecting 10"
        );
    }

    #[test]
    fn test_retry_policy() {
        let config = EngineConfig::default();
        let drift = ConvergeError::Drift {
            subject: "queue".to_string(),
            diffs: vec![],
        };
        assert!(drift.is_retryable());
        assert_eq!(drift.requeue_after(&config), Some(Duration::from_secs(60)));

        let fatal = ConvergeError::configuration("host is required");
        assert!(!fatal.is_retryable());
        assert_eq!(fatal.requeue_after(&config), None);
        assert_eq!(fatal.reason(), "ConfigurationError");

        let wrapped = ConvergeError::dependency("error getting vhost testing", "HTTP 500: boom");
        assert_eq!(
            wrapped.to_string(),
            "dependency error: error getting vhost testing: HTTP 500: boom"
        );
    }
}
