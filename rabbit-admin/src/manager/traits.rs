//! Core trait for management API access.
//!
//! This module defines the `RabbitManager` trait - the abstraction over the
//! broker's administrative API used by every convergence component.

use async_trait::async_trait;

use crate::types::*;

/// Error types for management API operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AdminError {
    /// Broker answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Transport failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Response body could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),

    /// Endpoint could not be built
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Broker is unavailable
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl AdminError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AdminError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the broker reported the object as absent.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Administrative operations against a RabbitMQ broker.
///
/// Read operations fail with [`AdminError::Status`] on any non-2xx answer so
/// callers can branch on [`AdminError::is_not_found`]. Mutating operations
/// return the raw [`ApiResponse`]; checking the status against the expected
/// codes is the caller's job.
#[async_trait]
pub trait RabbitManager: Send + Sync {
    // Vhosts
    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>, AdminError>;
    async fn get_vhost(&self, vhost: &str) -> Result<VhostInfo, AdminError>;
    async fn put_vhost(
        &self,
        vhost: &str,
        settings: &VhostSettings,
    ) -> Result<ApiResponse, AdminError>;
    async fn delete_vhost(&self, vhost: &str) -> Result<ApiResponse, AdminError>;

    // Users
    async fn list_users(&self) -> Result<Vec<UserInfo>, AdminError>;
    async fn get_user(&self, username: &str) -> Result<UserInfo, AdminError>;
    async fn put_user(
        &self,
        username: &str,
        settings: &UserSettings,
    ) -> Result<ApiResponse, AdminError>;
    async fn delete_user(&self, username: &str) -> Result<ApiResponse, AdminError>;

    // Permissions
    async fn list_permissions_of(&self, username: &str)
        -> Result<Vec<PermissionInfo>, AdminError>;
    async fn update_permissions_in(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<ApiResponse, AdminError>;
    async fn clear_permissions_in(
        &self,
        vhost: &str,
        username: &str,
    ) -> Result<ApiResponse, AdminError>;

    // Policies
    async fn list_policies_in(&self, vhost: &str) -> Result<Vec<Policy>, AdminError>;
    async fn put_policy(
        &self,
        vhost: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<ApiResponse, AdminError>;
    async fn delete_policy(&self, vhost: &str, name: &str) -> Result<ApiResponse, AdminError>;

    // Queues
    async fn list_queues(&self) -> Result<Vec<QueueInfo>, AdminError>;
    async fn get_queue(&self, vhost: &str, queue: &str) -> Result<QueueInfo, AdminError>;
    async fn declare_queue(
        &self,
        vhost: &str,
        queue: &str,
        settings: &QueueSettings,
    ) -> Result<ApiResponse, AdminError>;
    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<ApiResponse, AdminError>;
}
