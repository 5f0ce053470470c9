//! Capabilities the engine consumes from its surroundings.
//!
//! The engine never talks to an orchestration substrate directly. Object
//! storage, secret storage and delayed re-invocation are reached through the
//! traits below; event delivery lives in [`crate::events::EventSink`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::resource::{Manifest, ObjectKey, Resource, ResourceStatus};
use crate::spec::UserSpec;

/// Key/value byte map held by a secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Error types for store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store rejected the write
    #[error("Store rejected write: {0}")]
    Rejected(String),
}

/// Secret lookup and storage, scoped by namespace.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch a secret. `Ok(None)` when it does not exist.
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<SecretData>, StoreError>;

    /// Create or replace a secret.
    async fn put_secret(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> Result<(), StoreError>;
}

/// Declarative object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the current desired state of an object.
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Manifest>, StoreError>;

    /// All user objects, across namespaces.
    async fn list_users(&self) -> Result<Vec<Resource<UserSpec>>, StoreError>;

    /// Create or update a user object's spec, keeping any recorded status.
    ///
    /// Returns `true` when the stored spec changed.
    async fn apply_user(&self, user: Resource<UserSpec>) -> Result<bool, StoreError>;

    /// Persist the status computed by a pass.
    async fn write_status(&self, key: &ObjectKey, status: &ResourceStatus)
        -> Result<(), StoreError>;
}

/// Requests a future pass for an object.
pub trait Scheduler: Send + Sync {
    /// Run a pass for `key` after `after`, or as soon as possible with `None`.
    fn schedule(&self, key: ObjectKey, after: Option<Duration>);
}
