//! In-memory capability implementations.
//!
//! Used by the operator binary for manifests loaded from disk and by tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::capability::*;
use crate::resource::{Manifest, ObjectKey, Resource, ResourceKind, ResourceStatus};
use crate::spec::UserSpec;

/// Object and secret store backed by concurrent maps.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<ObjectKey, Manifest>,
    /// (namespace, name) -> data
    secrets: DashMap<(String, String), SecretData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object, returning its key.
    pub fn insert(&self, manifest: Manifest) -> ObjectKey {
        let key = manifest.key();
        self.objects.insert(key.clone(), manifest);
        key
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Manifest> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<Manifest> {
        self.objects.remove(key).map(|(_, manifest)| manifest)
    }

    /// Keys of every stored object, sorted.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn status_of(&self, key: &ObjectKey) -> Option<ResourceStatus> {
        self.objects.get(key).map(|entry| entry.value().status().clone())
    }

    pub fn insert_secret<K, V>(
        &self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        let data = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.as_ref().to_vec()))
            .collect();
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<SecretData> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// A secret value decoded as UTF-8.
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        self.secret(namespace, name)
            .and_then(|data| data.get(key).cloned())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Manifest>, StoreError> {
        Ok(self.get(key))
    }

    async fn list_users(&self) -> Result<Vec<Resource<UserSpec>>, StoreError> {
        let mut users: Vec<Resource<UserSpec>> = self
            .objects
            .iter()
            .filter_map(|entry| match entry.value() {
                Manifest::RabbitUser(user) => Some(user.clone()),
                _ => None,
            })
            .collect();
        users.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });
        Ok(users)
    }

    async fn apply_user(&self, mut user: Resource<UserSpec>) -> Result<bool, StoreError> {
        let key = ObjectKey::for_meta(ResourceKind::User, &user.metadata);
        if let Some(Manifest::RabbitUser(existing)) = self.get(&key) {
            if existing.spec == user.spec {
                return Ok(false);
            }
            user.status = existing.status;
        }
        self.objects.insert(key, Manifest::RabbitUser(user));
        Ok(true)
    }

    async fn write_status(
        &self,
        key: &ObjectKey,
        status: &ResourceStatus,
    ) -> Result<(), StoreError> {
        match self.objects.get_mut(key) {
            Some(mut entry) => {
                *entry.value_mut().status_mut() = status.clone();
                Ok(())
            }
            None => Err(StoreError::Rejected(format!("{} does not exist", key))),
        }
    }
}

#[async_trait]
impl SecretStore for MemoryStore {
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<SecretData>, StoreError> {
        Ok(self.secret(namespace, name))
    }

    async fn put_secret(
        &self,
        namespace: &str,
        name: &str,
        data: SecretData,
    ) -> Result<(), StoreError> {
        self.secrets
            .insert((namespace.to_string(), name.to_string()), data);
        Ok(())
    }
}

/// Scheduler that only records requests.
#[derive(Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<(ObjectKey, Option<Duration>)>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests recorded so far, in order.
    pub fn requests(&self) -> Vec<(ObjectKey, Option<Duration>)> {
        self.lock().clone()
    }

    /// Drain recorded requests.
    pub fn take(&self) -> Vec<(ObjectKey, Option<Duration>)> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ObjectKey, Option<Duration>)>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, key: ObjectKey, after: Option<Duration>) {
        self.lock().push((key, after));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, tags: &str) -> Resource<UserSpec> {
        Resource::new(
            name,
            "default",
            UserSpec {
                tags: tags.to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_apply_user_reports_changes() {
        let store = MemoryStore::new();
        assert!(store.apply_user(user("app", "")).await.unwrap());
        assert!(!store.apply_user(user("app", "")).await.unwrap());
        assert!(store.apply_user(user("app", "management")).await.unwrap());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_user_keeps_status() {
        let store = MemoryStore::new();
        let key = store.insert(Manifest::RabbitUser(user("app", "")));

        let mut status = ResourceStatus::default();
        status
            .conditions
            .set_true(crate::status::READY, "Ready", "");
        store.write_status(&key, &status).await.unwrap();

        store.apply_user(user("app", "management")).await.unwrap();
        assert!(store.status_of(&key).unwrap().is_ready());
    }

    #[tokio::test]
    async fn test_write_status_requires_object() {
        let store = MemoryStore::new();
        let key = ObjectKey::new(ResourceKind::Queue, "default", "missing");
        assert!(store
            .write_status(&key, &ResourceStatus::default())
            .await
            .is_err());
    }

    #[test]
    fn test_secrets() {
        let store = MemoryStore::new();
        assert!(tokio_test::block_on(store.get_secret("ns", "s"))
            .unwrap()
            .is_none());
        store.insert_secret("ns", "s", [("RABBIT_PASSWORD", "pw")]);
        assert_eq!(
            store.secret_value("ns", "s", "RABBIT_PASSWORD").as_deref(),
            Some("pw")
        );
    }

    #[test]
    fn test_recording_scheduler() {
        let scheduler = RecordingScheduler::new();
        let key = ObjectKey::new(ResourceKind::Vhost, "default", "v");
        scheduler.schedule(key.clone(), Some(Duration::from_secs(10)));
        assert_eq!(scheduler.take(), vec![(key, Some(Duration::from_secs(10)))]);
        assert!(scheduler.requests().is_empty());
    }
}
