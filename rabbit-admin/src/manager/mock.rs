//! In-memory management API for testing.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::traits::*;
use crate::types::*;

/// A mutating call observed by [`MockRabbitManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    PutVhost { vhost: String },
    DeleteVhost { vhost: String },
    PutUser { username: String, settings: UserSettings },
    DeleteUser { username: String },
    UpdatePermissions { vhost: String, username: String, permissions: Permissions },
    ClearPermissions { vhost: String, username: String },
    PutPolicy { vhost: String, policy: Policy },
    DeletePolicy { vhost: String, name: String },
    DeclareQueue { vhost: String, queue: String, settings: QueueSettings },
    DeleteQueue { vhost: String, queue: String },
}

#[derive(Default)]
struct BrokerState {
    vhosts: BTreeMap<String, VhostInfo>,
    users: BTreeMap<String, UserInfo>,
    /// (username, vhost) -> permissions
    permissions: BTreeMap<(String, String), Permissions>,
    /// vhost -> name -> policy
    policies: BTreeMap<String, BTreeMap<String, Policy>>,
    /// (vhost, queue) -> queue
    queues: BTreeMap<(String, String), QueueInfo>,
    calls: Vec<MockCall>,
    /// operation name -> forced HTTP status
    overrides: HashMap<&'static str, u16>,
}

/// Mock broker for testing.
///
/// Behaves like the management plugin for the operations the engine uses:
/// first creation answers 201, updates and deletes 204, and lookups of absent
/// objects fail with a 404 [`AdminError::Status`]. Every mutating call is
/// recorded so tests can assert on exactly what was sent.
pub struct MockRabbitManager {
    state: Mutex<BrokerState>,
    available: AtomicBool,
}

fn not_found() -> AdminError {
    AdminError::Status {
        status: 404,
        body: r#"{"error":"Object Not Found","reason":"Not Found"}"#.to_string(),
    }
}

impl MockRabbitManager {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Seed a vhost.
    pub fn with_vhost(self, name: &str) -> Self {
        self.lock().vhosts.insert(name.to_string(), VhostInfo::new(name));
        self
    }

    /// Seed a user.
    pub fn with_user(self, user: UserInfo) -> Self {
        self.lock().users.insert(user.name.clone(), user);
        self
    }

    /// Seed a permission entry.
    pub fn with_permission(self, info: PermissionInfo) -> Self {
        self.lock()
            .permissions
            .insert((info.user.clone(), info.vhost.clone()), info.permissions());
        self
    }

    /// Seed a policy.
    pub fn with_policy(self, policy: Policy) -> Self {
        self.lock()
            .policies
            .entry(policy.vhost.clone())
            .or_default()
            .insert(policy.name.clone(), policy);
        self
    }

    /// Seed a queue.
    pub fn with_queue(self, queue: QueueInfo) -> Self {
        self.lock()
            .queues
            .insert((queue.vhost.clone(), queue.name.clone()), queue);
        self
    }

    /// Force every call of `operation` (the trait method name) to answer
    /// `status`. Reads fail with that status; mutations return it without
    /// touching state.
    pub fn with_status(self, operation: &'static str, status: u16) -> Self {
        self.lock().overrides.insert(operation, status);
        self
    }

    /// Set availability. An unavailable broker fails every call.
    pub fn with_available(self, available: bool) -> Self {
        self.available.store(available, Ordering::SeqCst);
        self
    }

    /// Mutating calls received so far, in order.
    pub fn mutations(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Number of mutating calls received so far.
    pub fn mutation_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Forget recorded calls, keeping broker state.
    pub fn clear_mutations(&self) {
        self.lock().calls.clear();
    }

    pub fn vhost_names(&self) -> Vec<String> {
        self.lock().vhosts.keys().cloned().collect()
    }

    pub fn user(&self, username: &str) -> Option<UserInfo> {
        self.lock().users.get(username).cloned()
    }

    /// Permissions held by `username`, keyed by vhost.
    pub fn permissions_of(&self, username: &str) -> BTreeMap<String, Permissions> {
        self.lock()
            .permissions
            .iter()
            .filter(|((user, _), _)| user == username)
            .map(|((_, vhost), perms)| (vhost.clone(), perms.clone()))
            .collect()
    }

    pub fn policies_in(&self, vhost: &str) -> Vec<Policy> {
        self.lock()
            .policies
            .get(vhost)
            .map(|policies| policies.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn queue(&self, vhost: &str, queue: &str) -> Option<QueueInfo> {
        self.lock()
            .queues
            .get(&(vhost.to_string(), queue.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), AdminError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdminError::Network("Mock broker disabled".to_string()))
        }
    }

    /// Gate a read: availability and forced status.
    fn read(&self, operation: &'static str) -> Result<(), AdminError> {
        self.check_available()?;
        match self.lock().overrides.get(operation) {
            Some(status) => Err(AdminError::Status {
                status: *status,
                body: String::new(),
            }),
            None => Ok(()),
        }
    }

    /// Gate a mutation: availability, forced status, and call recording.
    ///
    /// Returns `Some(response)` when the call is short-circuited by an
    /// override.
    fn mutate(
        &self,
        operation: &'static str,
        call: MockCall,
    ) -> Result<Option<ApiResponse>, AdminError> {
        self.check_available()?;
        let mut state = self.lock();
        state.calls.push(call);
        Ok(state
            .overrides
            .get(operation)
            .map(|status| ApiResponse::new(*status)))
    }
}

impl Default for MockRabbitManager {
    fn default() -> Self {
        Self::new()
    }
}

fn created_or_updated(existed: bool) -> ApiResponse {
    ApiResponse::new(if existed { 204 } else { 201 })
}

fn deleted(existed: bool) -> ApiResponse {
    ApiResponse::new(if existed { 204 } else { 404 })
}

#[async_trait]
impl RabbitManager for MockRabbitManager {
    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>, AdminError> {
        self.read("list_vhosts")?;
        Ok(self.lock().vhosts.values().cloned().collect())
    }

    async fn get_vhost(&self, vhost: &str) -> Result<VhostInfo, AdminError> {
        self.read("get_vhost")?;
        self.lock().vhosts.get(vhost).cloned().ok_or_else(not_found)
    }

    async fn put_vhost(
        &self,
        vhost: &str,
        _settings: &VhostSettings,
    ) -> Result<ApiResponse, AdminError> {
        let call = MockCall::PutVhost {
            vhost: vhost.to_string(),
        };
        if let Some(response) = self.mutate("put_vhost", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .vhosts
            .insert(vhost.to_string(), VhostInfo::new(vhost))
            .is_some();
        Ok(created_or_updated(existed))
    }

    async fn delete_vhost(&self, vhost: &str) -> Result<ApiResponse, AdminError> {
        let call = MockCall::DeleteVhost {
            vhost: vhost.to_string(),
        };
        if let Some(response) = self.mutate("delete_vhost", call)? {
            return Ok(response);
        }
        let mut state = self.lock();
        let existed = state.vhosts.remove(vhost).is_some();
        state.permissions.retain(|(_, v), _| v != vhost);
        state.policies.remove(vhost);
        state.queues.retain(|(v, _), _| v != vhost);
        Ok(deleted(existed))
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>, AdminError> {
        self.read("list_users")?;
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn get_user(&self, username: &str) -> Result<UserInfo, AdminError> {
        self.read("get_user")?;
        self.lock().users.get(username).cloned().ok_or_else(not_found)
    }

    async fn put_user(
        &self,
        username: &str,
        settings: &UserSettings,
    ) -> Result<ApiResponse, AdminError> {
        let call = MockCall::PutUser {
            username: username.to_string(),
            settings: settings.clone(),
        };
        if let Some(response) = self.mutate("put_user", call)? {
            return Ok(response);
        }
        let user = UserInfo {
            name: username.to_string(),
            password_hash: settings.password_hash.clone(),
            hashing_algorithm: settings.hashing_algorithm.clone(),
            tags: settings.tags.clone(),
        };
        let existed = self
            .lock()
            .users
            .insert(username.to_string(), user)
            .is_some();
        Ok(created_or_updated(existed))
    }

    async fn delete_user(&self, username: &str) -> Result<ApiResponse, AdminError> {
        let call = MockCall::DeleteUser {
            username: username.to_string(),
        };
        if let Some(response) = self.mutate("delete_user", call)? {
            return Ok(response);
        }
        let mut state = self.lock();
        let existed = state.users.remove(username).is_some();
        state.permissions.retain(|(u, _), _| u != username);
        Ok(deleted(existed))
    }

    async fn list_permissions_of(
        &self,
        username: &str,
    ) -> Result<Vec<PermissionInfo>, AdminError> {
        self.read("list_permissions_of")?;
        Ok(self
            .permissions_of(username)
            .into_iter()
            .map(|(vhost, perms)| PermissionInfo {
                user: username.to_string(),
                vhost,
                configure: perms.configure,
                write: perms.write,
                read: perms.read,
            })
            .collect())
    }

    async fn update_permissions_in(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<ApiResponse, AdminError> {
        let call = MockCall::UpdatePermissions {
            vhost: vhost.to_string(),
            username: username.to_string(),
            permissions: permissions.clone(),
        };
        if let Some(response) = self.mutate("update_permissions_in", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .permissions
            .insert(
                (username.to_string(), vhost.to_string()),
                permissions.clone(),
            )
            .is_some();
        Ok(created_or_updated(existed))
    }

    async fn clear_permissions_in(
        &self,
        vhost: &str,
        username: &str,
    ) -> Result<ApiResponse, AdminError> {
        let call = MockCall::ClearPermissions {
            vhost: vhost.to_string(),
            username: username.to_string(),
        };
        if let Some(response) = self.mutate("clear_permissions_in", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .permissions
            .remove(&(username.to_string(), vhost.to_string()))
            .is_some();
        Ok(deleted(existed))
    }

    async fn list_policies_in(&self, vhost: &str) -> Result<Vec<Policy>, AdminError> {
        self.read("list_policies_in")?;
        Ok(self.policies_in(vhost))
    }

    async fn put_policy(
        &self,
        vhost: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<ApiResponse, AdminError> {
        let mut stored = policy.clone();
        stored.vhost = vhost.to_string();
        stored.name = name.to_string();
        let call = MockCall::PutPolicy {
            vhost: vhost.to_string(),
            policy: stored.clone(),
        };
        if let Some(response) = self.mutate("put_policy", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .policies
            .entry(vhost.to_string())
            .or_default()
            .insert(name.to_string(), stored)
            .is_some();
        Ok(created_or_updated(existed))
    }

    async fn delete_policy(&self, vhost: &str, name: &str) -> Result<ApiResponse, AdminError> {
        let call = MockCall::DeletePolicy {
            vhost: vhost.to_string(),
            name: name.to_string(),
        };
        if let Some(response) = self.mutate("delete_policy", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .policies
            .get_mut(vhost)
            .and_then(|policies| policies.remove(name))
            .is_some();
        Ok(deleted(existed))
    }

    async fn list_queues(&self) -> Result<Vec<QueueInfo>, AdminError> {
        self.read("list_queues")?;
        Ok(self.lock().queues.values().cloned().collect())
    }

    async fn get_queue(&self, vhost: &str, queue: &str) -> Result<QueueInfo, AdminError> {
        self.read("get_queue")?;
        self.queue(vhost, queue).ok_or_else(not_found)
    }

    async fn declare_queue(
        &self,
        vhost: &str,
        queue: &str,
        settings: &QueueSettings,
    ) -> Result<ApiResponse, AdminError> {
        let call = MockCall::DeclareQueue {
            vhost: vhost.to_string(),
            queue: queue.to_string(),
            settings: settings.clone(),
        };
        if let Some(response) = self.mutate("declare_queue", call)? {
            return Ok(response);
        }
        let key = (vhost.to_string(), queue.to_string());
        let mut state = self.lock();
        if state.queues.contains_key(&key) {
            return Ok(ApiResponse::new(204));
        }
        state.queues.insert(
            key,
            QueueInfo {
                name: queue.to_string(),
                vhost: vhost.to_string(),
                durable: settings.durable,
                auto_delete: settings.auto_delete,
                arguments: settings.arguments.clone(),
            },
        );
        Ok(ApiResponse::new(201))
    }

    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<ApiResponse, AdminError> {
        let call = MockCall::DeleteQueue {
            vhost: vhost.to_string(),
            queue: queue.to_string(),
        };
        if let Some(response) = self.mutate("delete_queue", call)? {
            return Ok(response);
        }
        let existed = self
            .lock()
            .queues
            .remove(&(vhost.to_string(), queue.to_string()))
            .is_some();
        Ok(deleted(existed))
    }
}
