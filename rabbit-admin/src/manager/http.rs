//! reqwest-backed management API client.
//!
//! Talks to the broker's management plugin (`/api/...`) with basic auth.
//! Path segments are percent-encoded individually so the default vhost `/`
//! travels as `%2F`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::traits::*;
use crate::types::*;

/// Transport options for [`HttpRabbitManager`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Skip TLS certificate verification
    pub insecure_skip_verify: bool,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Build the management endpoint for a connection.
///
/// AMQP schemes map onto their HTTP counterparts (`amqp` → `http`,
/// `amqps` → `https`); anything else is used as given. A missing port keeps
/// the scheme's default.
pub fn management_url(scheme: &str, host: &str, port: Option<u16>) -> Result<Url, AdminError> {
    let scheme = match scheme {
        "amqp" => "http",
        "amqps" => "https",
        other => other,
    };
    let authority = match port {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    Url::parse(&format!("{}://{}/", scheme, authority))
        .map_err(|e| AdminError::InvalidUrl(format!("{}://{}: {}", scheme, authority, e)))
}

/// Management API client over HTTP(S).
pub struct HttpRabbitManager {
    client: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl HttpRabbitManager {
    /// Create a client for the management API rooted at `base_url`.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, AdminError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure_skip_verify)
            .build()
            .map_err(|e| AdminError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    /// Base URL of the management API.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `<base>/api/<segments...>`.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, AdminError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AdminError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, AdminError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| AdminError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdminError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| AdminError::Parse(e.to_string()))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<ApiResponse, AdminError> {
        let url = self.endpoint(segments)?;
        debug!(method = %method, url = %url, "mutating call");

        let mut request = self
            .client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdminError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(ApiResponse::new(status).with_body(body))
    }
}

#[async_trait]
impl RabbitManager for HttpRabbitManager {
    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>, AdminError> {
        self.get_json(&["vhosts"]).await
    }

    async fn get_vhost(&self, vhost: &str) -> Result<VhostInfo, AdminError> {
        self.get_json(&["vhosts", vhost]).await
    }

    async fn put_vhost(
        &self,
        vhost: &str,
        settings: &VhostSettings,
    ) -> Result<ApiResponse, AdminError> {
        self.send(Method::PUT, &["vhosts", vhost], Some(settings))
            .await
    }

    async fn delete_vhost(&self, vhost: &str) -> Result<ApiResponse, AdminError> {
        self.send::<()>(Method::DELETE, &["vhosts", vhost], None)
            .await
    }

    async fn list_users(&self) -> Result<Vec<UserInfo>, AdminError> {
        self.get_json(&["users"]).await
    }

    async fn get_user(&self, username: &str) -> Result<UserInfo, AdminError> {
        self.get_json(&["users", username]).await
    }

    async fn put_user(
        &self,
        username: &str,
        settings: &UserSettings,
    ) -> Result<ApiResponse, AdminError> {
        self.send(Method::PUT, &["users", username], Some(settings))
            .await
    }

    async fn delete_user(&self, username: &str) -> Result<ApiResponse, AdminError> {
        self.send::<()>(Method::DELETE, &["users", username], None)
            .await
    }

    async fn list_permissions_of(
        &self,
        username: &str,
    ) -> Result<Vec<PermissionInfo>, AdminError> {
        self.get_json(&["users", username, "permissions"]).await
    }

    async fn update_permissions_in(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<ApiResponse, AdminError> {
        self.send(
            Method::PUT,
            &["permissions", vhost, username],
            Some(permissions),
        )
        .await
    }

    async fn clear_permissions_in(
        &self,
        vhost: &str,
        username: &str,
    ) -> Result<ApiResponse, AdminError> {
        self.send::<()>(Method::DELETE, &["permissions", vhost, username], None)
            .await
    }

    async fn list_policies_in(&self, vhost: &str) -> Result<Vec<Policy>, AdminError> {
        self.get_json(&["policies", vhost]).await
    }

    async fn put_policy(
        &self,
        vhost: &str,
        name: &str,
        policy: &Policy,
    ) -> Result<ApiResponse, AdminError> {
        self.send(Method::PUT, &["policies", vhost, name], Some(policy))
            .await
    }

    async fn delete_policy(&self, vhost: &str, name: &str) -> Result<ApiResponse, AdminError> {
        self.send::<()>(Method::DELETE, &["policies", vhost, name], None)
            .await
    }

    async fn list_queues(&self) -> Result<Vec<QueueInfo>, AdminError> {
        self.get_json(&["queues"]).await
    }

    async fn get_queue(&self, vhost: &str, queue: &str) -> Result<QueueInfo, AdminError> {
        self.get_json(&["queues", vhost, queue]).await
    }

    async fn declare_queue(
        &self,
        vhost: &str,
        queue: &str,
        settings: &QueueSettings,
    ) -> Result<ApiResponse, AdminError> {
        self.send(Method::PUT, &["queues", vhost, queue], Some(settings))
            .await
    }

    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<ApiResponse, AdminError> {
        self.send::<()>(Method::DELETE, &["queues", vhost, queue], None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager_for(server: &MockServer) -> HttpRabbitManager {
        let base = Url::parse(&server.uri()).unwrap();
        HttpRabbitManager::new(base, "guest", "guest", ClientOptions::default()).unwrap()
    }

    #[test]
    fn test_management_url_maps_amqp_schemes() {
        assert_eq!(
            management_url("amqp", "rabbit", Some(15672)).unwrap().as_str(),
            "http://rabbit:15672/"
        );
        assert_eq!(
            management_url("amqps", "rabbit", None).unwrap().as_str(),
            "https://rabbit/"
        );
        assert_eq!(
            management_url("http", "rabbit", None).unwrap().as_str(),
            "http://rabbit/"
        );
    }

    #[tokio::test]
    async fn test_default_vhost_is_percent_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/vhosts/%2F"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "/"})))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let vhost = manager.get_vhost("/").await.unwrap();
        assert_eq!(vhost.name, "/");
    }

    #[tokio::test]
    async fn test_get_missing_user_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/nobody"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(serde_json::json!({"error": "Object Not Found", "reason": "Not Found"})),
            )
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let err = manager.get_user("nobody").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_returns_status_for_caller_to_check() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/permissions/testing/app"))
            .and(body_json(serde_json::json!({"configure": ".*", "write": ".*", "read": ".*"})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/api/users/app"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "bad_request", "reason": "bad tags"})),
            )
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let response = manager
            .update_permissions_in(
                "testing",
                "app",
                &Permissions {
                    configure: ".*".to_string(),
                    write: ".*".to_string(),
                    read: ".*".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(response.status, 201);

        let response = manager
            .put_user("app", &UserSettings::default())
            .await
            .unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.reason(), "bad tags");
    }

    #[tokio::test]
    async fn test_list_policies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/policies/testing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"vhost": "testing", "name": "testing-ha", "pattern": ".*", "apply-to": "all", "definition": {"ha-mode": "all"}, "priority": 0}
            ])))
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let policies = manager.list_policies_in("testing").await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "testing-ha");
    }
}
