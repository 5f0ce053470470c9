//! Credential secret handed to consumers of a user.
//!
//! The key names are a stable contract: applications mount the secret and
//! read these variables directly.

use url::Url;

use crate::capability::SecretData;
use crate::connection::ResolvedConnection;
use crate::error::ConvergeError;
use crate::spec::UserSpec;
use crate::watch::WILDCARD_VHOST;

pub const RABBIT_HOST: &str = "RABBIT_HOST";
pub const RABBIT_USERNAME: &str = "RABBIT_USERNAME";
pub const RABBIT_PASSWORD: &str = "RABBIT_PASSWORD";
pub const RABBIT_URL: &str = "RABBIT_URL";
pub const RABBIT_URL_VHOST: &str = "RABBIT_URL_VHOST";

/// Name of the credential secret for a user object.
pub fn secret_name(object_name: &str) -> String {
    format!("{}-rabbituser", object_name)
}

/// Path form of a vhost: `/` stays as is, anything else gains a leading `/`.
pub fn vhost_path(vhost: &str) -> String {
    if vhost == "/" {
        vhost.to_string()
    } else {
        format!("/{}", vhost)
    }
}

/// The single concrete vhost a user is granted, if there is exactly one.
pub fn sole_vhost(spec: &UserSpec) -> Option<&str> {
    match spec.permissions.as_slice() {
        [only] if only.vhost != WILDCARD_VHOST => Some(only.vhost.as_str()),
        _ => None,
    }
}

/// AMQP URI for a user: the broker URI with the user's credentials, where
/// `http` becomes `amqp`, `https` becomes `amqps`, and the port is dropped so
/// clients use the protocol default.
pub fn amqp_url(
    connection: &ResolvedConnection,
    username: &str,
    password: &str,
) -> Result<Url, ConvergeError> {
    let scheme = match connection.scheme.as_str() {
        "http" => "amqp",
        "https" => "amqps",
        other => other,
    };
    ResolvedConnection {
        scheme: scheme.to_string(),
        port: None,
        username: username.to_string(),
        password: password.to_string(),
        ..connection.clone()
    }
    .uri()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub url_vhost: Option<String>,
}

impl UserCredentials {
    pub fn new(
        connection: &ResolvedConnection,
        spec: &UserSpec,
        password: &str,
    ) -> Result<Self, ConvergeError> {
        let url = amqp_url(connection, &spec.username, password)?;
        let base = url.as_str().trim_end_matches('/').to_string();
        let vhost = sole_vhost(spec).map(vhost_path);

        let host = match (&vhost, spec.output_vhost) {
            (Some(path), true) => format!("{}{}", connection.host, path),
            _ => connection.host.clone(),
        };

        Ok(Self {
            host,
            username: spec.username.clone(),
            password: password.to_string(),
            url_vhost: vhost.map(|path| format!("{}{}", base, path)),
            url: base,
        })
    }

    /// Merge into existing secret data, keeping unrelated keys.
    pub fn merge_into(&self, data: &mut SecretData) {
        data.insert(RABBIT_HOST.to_string(), self.host.clone().into_bytes());
        data.insert(RABBIT_USERNAME.to_string(), self.username.clone().into_bytes());
        data.insert(RABBIT_PASSWORD.to_string(), self.password.clone().into_bytes());
        data.insert(RABBIT_URL.to_string(), self.url.clone().into_bytes());
        match &self.url_vhost {
            Some(url) => {
                data.insert(RABBIT_URL_VHOST.to_string(), url.clone().into_bytes());
            }
            None => {
                data.remove(RABBIT_URL_VHOST);
            }
        }
    }

    pub fn to_secret_data(&self) -> SecretData {
        let mut data = SecretData::new();
        self.merge_into(&mut data);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PermissionEntry;

    fn connection(scheme: &str) -> ResolvedConnection {
        ResolvedConnection {
            scheme: scheme.to_string(),
            host: "rabbit.internal".to_string(),
            port: Some(15672),
            username: "admin".to_string(),
            password: "admin".to_string(),
            insecure_skip_verify: false,
            vhost: None,
        }
    }

    fn spec(vhosts: &[&str], output_vhost: bool) -> UserSpec {
        UserSpec {
            username: "app".to_string(),
            permissions: vhosts
                .iter()
                .map(|v| PermissionEntry {
                    vhost: v.to_string(),
                    ..Default::default()
                })
                .collect(),
            output_vhost,
            ..Default::default()
        }
    }

    #[test]
    fn test_vhost_path() {
        assert_eq!(vhost_path("/"), "/");
        assert_eq!(vhost_path("orders"), "/orders");
    }

    #[test]
    fn test_url_scheme_and_port() {
        let url = amqp_url(&connection("https"), "app", "pw").unwrap();
        assert_eq!(url.as_str(), "amqps://app:pw@rabbit.internal");
        let url = amqp_url(&connection("amqp"), "app", "pw").unwrap();
        assert_eq!(url.as_str(), "amqp://app:pw@rabbit.internal");
    }

    #[test]
    fn test_url_carries_user_not_admin() {
        let admin = connection("http");
        let url = amqp_url(&admin, "app", "s3cret").unwrap();
        assert_eq!(url.username(), "app");
        assert_eq!(url.password(), Some("s3cret"));
        assert_eq!(url.port(), None);
        assert!(admin.uri().unwrap().as_str().starts_with("http://admin:admin@"));
    }

    #[test]
    fn test_single_vhost_credentials() {
        let creds = UserCredentials::new(&connection("http"), &spec(&["orders"], false), "pw").unwrap();
        assert_eq!(creds.host, "rabbit.internal");
        assert_eq!(creds.url, "amqp://app:pw@rabbit.internal");
        assert_eq!(
            creds.url_vhost.as_deref(),
            Some("amqp://app:pw@rabbit.internal/orders")
        );

        let creds = UserCredentials::new(&connection("http"), &spec(&["orders"], true), "pw").unwrap();
        assert_eq!(creds.host, "rabbit.internal/orders");
    }

    #[test]
    fn test_wildcard_and_multi_vhost_have_no_vhost_url() {
        let creds = UserCredentials::new(&connection("http"), &spec(&["*"], false), "pw").unwrap();
        assert_eq!(creds.url_vhost, None);
        let creds = UserCredentials::new(&connection("http"), &spec(&["a", "b"], false), "pw").unwrap();
        assert_eq!(creds.url_vhost, None);

        let data = creds.to_secret_data();
        assert!(!data.contains_key(RABBIT_URL_VHOST));
        assert_eq!(data[RABBIT_PASSWORD], b"pw".to_vec());
    }
}
