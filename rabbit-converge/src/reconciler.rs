//! Per-object reconcilers.
//!
//! A pass admits the object, resolves a connection, runs the components for
//! its kind in order, and folds the result into the aggregate `Ready`
//! condition:
//!
//! - error: the component that failed and `Ready` go false with the error's
//!   reason, and the error decides whether and when to retry
//! - a component asked to skip the rest: `Ready` is false `Pending`
//! - otherwise `Ready` is true only when every constituent condition is true

use std::sync::Arc;
use std::time::Duration;

use rabbit_admin::RabbitManager;
use tracing::{debug, info, warn};

use crate::admission::Admission;
use crate::capability::{ObjectStore, Scheduler, SecretStore};
use crate::components::{permissions, policies, queue, user, vhost, PassContext, Step};
use crate::config::{ConnectionDefaults, EngineConfig};
use crate::connection::{self, ManagerFactory, ResolvedConnection};
use crate::credentials::{self, UserCredentials, RABBIT_PASSWORD};
use crate::error::ConvergeError;
use crate::events::EventSink;
use crate::password::generate_password;
use crate::resource::{Manifest, ObjectKey, ObjectMeta, Resource, ResourceKind};
use crate::spec::{ConnectionSpec, PermissionEntry, QueueSpec, UserSpec, VhostSpec};
use crate::status::*;
use crate::watch;

const USER_CONDITIONS: &[&str] = &[USER_READY, PERMISSIONS_READY];
const VHOST_CONDITIONS: &[&str] = &[VHOST_READY, POLICIES_READY, USER_READY];
const VHOST_CONDITIONS_WITHOUT_USER: &[&str] = &[VHOST_READY, POLICIES_READY];
const QUEUE_CONDITIONS: &[&str] = &[QUEUE_READY];

/// Where an object stands after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Ready,
    /// Waiting on the broker or a dependent object
    Pending,
    RetryableFailure,
    FatalFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub state: PassState,
    /// Requested delay before the next pass
    pub requeue_after: Option<Duration>,
    /// Successful broker mutations during the pass
    pub changes: usize,
    pub error: Option<ConvergeError>,
}

impl ReconcileOutcome {
    pub fn is_ready(&self) -> bool {
        self.state == PassState::Ready
    }
}

/// Drives convergence passes for vhost, user and queue objects.
pub struct Reconciler {
    factory: Arc<dyn ManagerFactory>,
    store: Arc<dyn ObjectStore>,
    secrets: Arc<dyn SecretStore>,
    events: Arc<dyn EventSink>,
    scheduler: Arc<dyn Scheduler>,
    defaults: ConnectionDefaults,
    config: EngineConfig,
}

impl Reconciler {
    pub fn new(
        factory: Arc<dyn ManagerFactory>,
        store: Arc<dyn ObjectStore>,
        secrets: Arc<dyn SecretStore>,
        events: Arc<dyn EventSink>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            factory,
            store,
            secrets,
            events,
            scheduler,
            defaults: ConnectionDefaults::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: ConnectionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one pass for the object stored under `key`, persist its status
    /// and schedule any requested follow-up.
    ///
    /// Returns `Ok(None)` when the object no longer exists.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Option<ReconcileOutcome>, ConvergeError> {
        let Some(mut manifest) = self.store.fetch(key).await? else {
            debug!(object = %key, "object gone, nothing to reconcile");
            return Ok(None);
        };

        let outcome = match &mut manifest {
            Manifest::RabbitVhost(resource) => self.reconcile_vhost(resource).await,
            Manifest::RabbitUser(resource) => self.reconcile_user(resource).await,
            Manifest::RabbitQueue(resource) => self.reconcile_queue(resource).await,
        };

        self.store.write_status(key, manifest.status()).await?;

        if let Some(after) = outcome.requeue_after {
            self.scheduler.schedule(key.clone(), Some(after));
        }

        match &outcome.error {
            Some(err) => warn!(object = %key, state = ?outcome.state, error = %err, "pass failed"),
            None => info!(
                object = %key,
                state = ?outcome.state,
                changes = outcome.changes,
                "pass complete"
            ),
        }
        Ok(Some(outcome))
    }

    /// Converge a user and its permissions, then publish its credentials.
    pub async fn reconcile_user(&self, resource: &mut Resource<UserSpec>) -> ReconcileOutcome {
        let key = ObjectKey::for_meta(ResourceKind::User, &resource.metadata);
        if let Err(err) = resource.admit() {
            return self.rejected(&mut resource.status.conditions, err);
        }

        let mut conditions = std::mem::take(&mut resource.status.conditions);
        let mut ctx = PassContext::new(&key, &mut conditions, self.events.as_ref(), &self.config);
        let result = self.converge_user(resource, &mut ctx).await;
        let changes = ctx.changes;

        let outcome = self.finish(&mut conditions, USER_CONDITIONS, result, changes);
        resource.status.conditions = conditions;
        outcome
    }

    /// Converge a vhost, its policies and its owner user.
    pub async fn reconcile_vhost(&self, resource: &mut Resource<VhostSpec>) -> ReconcileOutcome {
        let key = ObjectKey::for_meta(ResourceKind::Vhost, &resource.metadata);
        if let Err(err) = resource.admit() {
            return self.rejected(&mut resource.status.conditions, err);
        }
        let constituents = if resource.spec.skip_user {
            VHOST_CONDITIONS_WITHOUT_USER
        } else {
            VHOST_CONDITIONS
        };

        let mut conditions = std::mem::take(&mut resource.status.conditions);
        let mut ctx = PassContext::new(&key, &mut conditions, self.events.as_ref(), &self.config);
        let mut created = false;
        let result = self.converge_vhost(resource, &mut ctx, &mut created).await;
        let changes = ctx.changes;

        let outcome = self.finish(&mut conditions, constituents, result, changes);
        resource.status.conditions = conditions;

        if created {
            self.wake_wildcard_users().await;
        }
        outcome
    }

    /// Converge a queue.
    pub async fn reconcile_queue(&self, resource: &mut Resource<QueueSpec>) -> ReconcileOutcome {
        let key = ObjectKey::for_meta(ResourceKind::Queue, &resource.metadata);
        if let Err(err) = resource.admit() {
            return self.rejected(&mut resource.status.conditions, err);
        }

        let mut conditions = std::mem::take(&mut resource.status.conditions);
        let mut ctx = PassContext::new(&key, &mut conditions, self.events.as_ref(), &self.config);
        let result = self.converge_queue(resource, &mut ctx).await;
        let changes = ctx.changes;

        let outcome = self.finish(&mut conditions, QUEUE_CONDITIONS, result, changes);
        resource.status.conditions = conditions;
        outcome
    }

    /// Remove the broker object behind a deleted resource.
    pub async fn finalize(&self, manifest: &Manifest) -> Result<(), ConvergeError> {
        let mut manifest = manifest.clone();
        manifest.apply_defaults();

        match &manifest {
            Manifest::RabbitVhost(resource) => {
                let (_, manager) = self
                    .connect(&resource.spec.connection, &resource.metadata.namespace)
                    .await?;
                vhost::finalize(manager.as_ref(), &resource.spec.vhost_name).await
            }
            Manifest::RabbitUser(resource) => {
                let (_, manager) = self
                    .connect(&resource.spec.connection, &resource.metadata.namespace)
                    .await?;
                user::finalize(manager.as_ref(), &resource.spec.username).await
            }
            Manifest::RabbitQueue(resource) => {
                let (_, manager) = self
                    .connect(&resource.spec.connection, &resource.metadata.namespace)
                    .await?;
                queue::finalize(
                    manager.as_ref(),
                    &resource.spec.vhost,
                    &resource.spec.queue_name,
                )
                .await
            }
        }
    }

    async fn connect(
        &self,
        spec: &ConnectionSpec,
        namespace: &str,
    ) -> Result<(ResolvedConnection, Arc<dyn RabbitManager>), ConvergeError> {
        let resolved =
            connection::resolve(spec, namespace, &self.defaults, self.secrets.as_ref()).await?;
        let manager = self.factory.connect(&resolved)?;
        Ok((resolved, manager))
    }

    async fn converge_user(
        &self,
        resource: &Resource<UserSpec>,
        ctx: &mut PassContext<'_>,
    ) -> Result<Step, ConvergeError> {
        let spec = &resource.spec;
        let (resolved, manager) = self
            .connect(&spec.connection, &resource.metadata.namespace)
            .await?;
        let password = self.user_password(&resource.metadata).await?;

        let step = user::converge(manager.as_ref(), ctx, &spec.username, &spec.tags, &password).await?;
        if step.skip_remaining {
            return Ok(step);
        }
        let step = step.and(
            permissions::converge(manager.as_ref(), ctx, &spec.username, &spec.permissions).await?,
        );

        self.publish_credentials(resource, &resolved, &password)
            .await?;
        Ok(step)
    }

    async fn converge_vhost(
        &self,
        resource: &Resource<VhostSpec>,
        ctx: &mut PassContext<'_>,
        created: &mut bool,
    ) -> Result<Step, ConvergeError> {
        let spec = &resource.spec;
        let (_, manager) = self
            .connect(&spec.connection, &resource.metadata.namespace)
            .await?;

        let before = ctx.changes;
        let step = vhost::converge(manager.as_ref(), ctx, &spec.vhost_name).await?;
        *created = ctx.changes > before;

        let mut step = step.and(
            policies::converge(manager.as_ref(), ctx, &spec.vhost_name, &spec.policies).await?,
        );
        if !spec.skip_user {
            step = step.and(self.ensure_owner(resource, ctx).await?);
        }
        Ok(step)
    }

    async fn converge_queue(
        &self,
        resource: &Resource<QueueSpec>,
        ctx: &mut PassContext<'_>,
    ) -> Result<Step, ConvergeError> {
        let spec = &resource.spec;
        let (_, manager) = self
            .connect(&spec.connection, &resource.metadata.namespace)
            .await?;
        queue::converge(manager.as_ref(), ctx, &spec.queue_name, spec).await
    }

    /// Keep the vhost's owner user object in place and mirror its readiness.
    async fn ensure_owner(
        &self,
        resource: &Resource<VhostSpec>,
        ctx: &mut PassContext<'_>,
    ) -> Result<Step, ConvergeError> {
        ctx.conditions.set_unknown(USER_READY, "Unknown");

        let owner = owner_user(resource);
        let key = ObjectKey::for_meta(ResourceKind::User, &owner.metadata);
        let declared = match self.store.fetch(&key).await? {
            Some(Manifest::RabbitUser(existing)) => existing.metadata.owner != owner.metadata.owner,
            _ => false,
        };
        if declared {
            warn!(
                user = %key,
                vhost = %resource.spec.vhost_name,
                "user declared separately, leaving its spec in place"
            );
        } else if self.store.apply_user(owner).await? {
            info!(user = %key, vhost = %resource.spec.vhost_name, "applied vhost owner user");
            self.scheduler.schedule(key.clone(), None);
        }

        let ready = match self.store.fetch(&key).await? {
            Some(Manifest::RabbitUser(user)) => user.status.conditions.get(READY).cloned(),
            _ => None,
        };
        match ready {
            Some(ready) if ready.status == ConditionStatus::True => {
                ctx.conditions
                    .set_true(USER_READY, ready.reason, ready.message);
                Ok(Step::done())
            }
            Some(ready) => {
                ctx.conditions
                    .set(USER_READY, ready.status, ready.reason, ready.message);
                Ok(Step::requeue(self.config.user_settle_delay()))
            }
            None => {
                ctx.conditions.set_false(
                    USER_READY,
                    "Pending",
                    format!("waiting for user {}", key.name),
                );
                Ok(Step::requeue(self.config.user_settle_delay()))
            }
        }
    }

    /// Read the user's password from its credential secret, generating and
    /// storing one on first use.
    async fn user_password(&self, meta: &ObjectMeta) -> Result<String, ConvergeError> {
        let name = credentials::secret_name(&meta.name);
        let existing = self.secrets.get_secret(&meta.namespace, &name).await?;

        if let Some(stored) = existing.as_ref().and_then(|data| data.get(RABBIT_PASSWORD)) {
            return String::from_utf8(stored.clone()).map_err(|_| {
                ConvergeError::configuration(format!(
                    "{} in secret {}/{} is not valid UTF-8",
                    RABBIT_PASSWORD, meta.namespace, name
                ))
            });
        }

        let password = generate_password(self.config.generated_password_length);
        let mut data = existing.unwrap_or_default();
        data.insert(RABBIT_PASSWORD.to_string(), password.clone().into_bytes());
        self.secrets.put_secret(&meta.namespace, &name, data).await?;
        info!(secret = %name, namespace = %meta.namespace, "generated user password");
        Ok(password)
    }

    async fn publish_credentials(
        &self,
        resource: &Resource<UserSpec>,
        resolved: &ResolvedConnection,
        password: &str,
    ) -> Result<(), ConvergeError> {
        let namespace = &resource.metadata.namespace;
        let name = credentials::secret_name(&resource.metadata.name);

        let existing = self
            .secrets
            .get_secret(namespace, &name)
            .await?
            .unwrap_or_default();
        let mut data = existing.clone();
        UserCredentials::new(resolved, &resource.spec, password)?.merge_into(&mut data);

        if data != existing {
            self.secrets.put_secret(namespace, &name, data).await?;
            debug!(secret = %name, namespace = %namespace, "published credentials");
        }
        Ok(())
    }

    async fn wake_wildcard_users(&self) {
        match watch::dependents_of_vhost(self.store.as_ref()).await {
            Ok(keys) => {
                for key in keys {
                    debug!(user = %key, "vhost appeared, reconciling wildcard user");
                    self.scheduler.schedule(key, None);
                }
            }
            Err(e) => warn!(error = %e, "error listing users for * vhost permissions"),
        }
    }

    fn rejected(&self, conditions: &mut Conditions, err: ConvergeError) -> ReconcileOutcome {
        conditions.set_false(READY, err.reason(), err.to_string());
        ReconcileOutcome {
            state: PassState::FatalFailure,
            requeue_after: None,
            changes: 0,
            error: Some(err),
        }
    }

    fn finish(
        &self,
        conditions: &mut Conditions,
        constituents: &[&str],
        result: Result<Step, ConvergeError>,
        changes: usize,
    ) -> ReconcileOutcome {
        match result {
            Err(err) => {
                let failed = constituents
                    .iter()
                    .find(|c| conditions.status_of(c) == ConditionStatus::Unknown)
                    .or(constituents.first())
                    .copied();
                if let Some(failed) = failed {
                    conditions.set_false(failed, err.reason(), err.to_string());
                }
                conditions.set_false(READY, err.reason(), err.to_string());

                ReconcileOutcome {
                    state: if err.is_retryable() {
                        PassState::RetryableFailure
                    } else {
                        PassState::FatalFailure
                    },
                    requeue_after: err.requeue_after(&self.config),
                    changes,
                    error: Some(err),
                }
            }
            Ok(step) => {
                let state = if !step.skip_remaining && conditions.all_true(constituents) {
                    conditions.set_true(READY, "Ready", "");
                    PassState::Ready
                } else {
                    let message = conditions
                        .first_not_true(constituents)
                        .map(|c| c.message.clone())
                        .unwrap_or_default();
                    conditions.set_false(READY, "Pending", message);
                    PassState::Pending
                };

                ReconcileOutcome {
                    state,
                    requeue_after: step.requeue_after,
                    changes,
                    error: None,
                }
            }
        }
    }
}

/// Companion user for a vhost: full rights on the vhost, vhost published in
/// its credentials.
pub fn owner_user(vhost: &Resource<VhostSpec>) -> Resource<UserSpec> {
    let mut user = Resource::new(
        vhost.metadata.name.clone(),
        vhost.metadata.namespace.clone(),
        UserSpec {
            username: vhost.metadata.name.clone(),
            tags: String::new(),
            permissions: vec![PermissionEntry {
                vhost: vhost.spec.vhost_name.clone(),
                configure: ".*".to_string(),
                write: ".*".to_string(),
                read: ".*".to_string(),
            }],
            output_vhost: true,
            connection: vhost.spec.connection.clone(),
        },
    );
    user.metadata.owner = Some(ObjectKey::for_meta(ResourceKind::Vhost, &vhost.metadata));
    user
}
