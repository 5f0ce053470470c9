//! Connection resolution.
//!
//! Turns a [`ConnectionSpec`] into concrete broker coordinates and an
//! authenticated management API handle. Each field resolves in order:
//!
//! - explicit spec value
//! - process-wide default from `DEFAULT_CONNECTION`
//! - protocol fallback `amqp` (scheme only)
//!
//! Host and username are mandatory after defaulting. The password comes from
//! the referenced secret, else the default URI, else
//! `DEFAULT_CONNECTION_PASSWORD`, else empty.
//!
//! There is no pooling: every pass builds a fresh handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rabbit_admin::{management_url, ClientOptions, HttpRabbitManager, RabbitManager};
use tracing::debug;
use url::Url;

use crate::capability::SecretStore;
use crate::config::ConnectionDefaults;
use crate::error::ConvergeError;
use crate::spec::ConnectionSpec;

/// Key read from a password secret when the reference names none.
pub const DEFAULT_SECRET_KEY: &str = "password";

/// Fully resolved broker coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConnection {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    pub insecure_skip_verify: bool,
    pub vhost: Option<String>,
}

impl ResolvedConnection {
    /// Canonical URI with credentials embedded.
    pub fn uri(&self) -> Result<Url, ConvergeError> {
        let authority = match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        };
        let mut uri = Url::parse(&format!("{}://{}", self.scheme, authority))
            .map_err(|e| ConvergeError::configuration(format!("invalid broker address {}: {}", authority, e)))?;
        embed_credentials(&mut uri, &self.username, &self.password)?;
        Ok(uri)
    }

    /// Base URL of the management API.
    pub fn management_url(&self) -> Result<Url, ConvergeError> {
        management_url(&self.scheme, &self.host, self.port)
            .map_err(|e| ConvergeError::configuration(e.to_string()))
    }
}

fn embed_credentials(
    uri: &mut Url,
    username: &str,
    password: &str,
) -> Result<(), ConvergeError> {
    uri.set_username(username)
        .and_then(|_| uri.set_password(Some(password)))
        .map_err(|_| ConvergeError::configuration(format!("cannot embed credentials in {}", uri)))
}

/// Resolve a connection spec against process defaults and the secret store.
pub async fn resolve(
    spec: &ConnectionSpec,
    namespace: &str,
    defaults: &ConnectionDefaults,
    secrets: &dyn SecretStore,
) -> Result<ResolvedConnection, ConvergeError> {
    let scheme = pick(&spec.protocol, &defaults.scheme).unwrap_or_else(|| "amqp".to_string());

    let host = pick(&spec.host, &defaults.host)
        .ok_or_else(|| ConvergeError::configuration("host is required"))?;

    let port = spec.port.filter(|p| *p != 0).or(defaults.port);

    let username = pick(&spec.username, &defaults.username)
        .ok_or_else(|| ConvergeError::configuration("username is required"))?;

    let password = match &spec.password_secret_ref {
        Some(secret_ref) => {
            let data = secrets
                .get_secret(namespace, &secret_ref.name)
                .await
                .map_err(|e| {
                    ConvergeError::dependency(
                        format!("error getting password secret {}/{}", namespace, secret_ref.name),
                        e,
                    )
                })?
                .ok_or_else(|| {
                    ConvergeError::Dependency(format!(
                        "password secret {}/{} not found",
                        namespace, secret_ref.name
                    ))
                })?;
            let key = if secret_ref.key.is_empty() {
                DEFAULT_SECRET_KEY
            } else {
                secret_ref.key.as_str()
            };
            let bytes = data.get(key).ok_or_else(|| {
                ConvergeError::Dependency(format!(
                    "key {} not found in password secret {}/{}",
                    key, namespace, secret_ref.name
                ))
            })?;
            String::from_utf8_lossy(bytes).into_owned()
        }
        None => defaults
            .password
            .clone()
            .or_else(|| defaults.env_password.clone())
            .unwrap_or_default(),
    };

    let insecure_skip_verify = spec
        .insecure_skip_verify
        .or(defaults.insecure_skip_verify)
        .unwrap_or(false);

    debug!(scheme = %scheme, host = %host, username = %username, "resolved connection");

    Ok(ResolvedConnection {
        scheme,
        host,
        port,
        username,
        password,
        insecure_skip_verify,
        vhost: spec.vhost.clone().filter(|v| !v.is_empty()),
    })
}

fn pick(explicit: &Option<String>, fallback: &Option<String>) -> Option<String> {
    explicit
        .as_ref()
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.as_ref().filter(|v| !v.is_empty()))
        .cloned()
}

/// Builds management API handles for resolved connections.
pub trait ManagerFactory: Send + Sync {
    fn connect(
        &self,
        connection: &ResolvedConnection,
    ) -> Result<Arc<dyn RabbitManager>, ConvergeError>;
}

/// Factory producing reqwest-backed clients.
pub struct HttpManagerFactory {
    timeout: Duration,
}

impl HttpManagerFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ManagerFactory for HttpManagerFactory {
    fn connect(
        &self,
        connection: &ResolvedConnection,
    ) -> Result<Arc<dyn RabbitManager>, ConvergeError> {
        let base_url = connection.management_url()?;
        let options = ClientOptions {
            insecure_skip_verify: connection.insecure_skip_verify,
            timeout: self.timeout,
        };
        let manager = HttpRabbitManager::new(
            base_url,
            connection.username.clone(),
            connection.password.clone(),
            options,
        )
        .map_err(|e| ConvergeError::dependency("error connecting to rabbitmq", e))?;
        Ok(Arc::new(manager))
    }
}

/// Factory handing out one shared manager, for tests and embedding.
pub struct StaticManagerFactory {
    manager: Arc<dyn RabbitManager>,
    connects: AtomicUsize,
}

impl StaticManagerFactory {
    pub fn new(manager: Arc<dyn RabbitManager>) -> Self {
        Self {
            manager,
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of handles requested so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ManagerFactory for StaticManagerFactory {
    fn connect(
        &self,
        _connection: &ResolvedConnection,
    ) -> Result<Arc<dyn RabbitManager>, ConvergeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.manager.clone())
    }
}
