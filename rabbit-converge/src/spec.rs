//! Desired-state specifications for each resource kind.
//!
//! Field names follow the camelCase manifest format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference to a key in a secret in the object's namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    pub name: String,
    /// Key within the secret, `password` when blank
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

/// How to reach the broker. Blank fields fall back to process defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_skip_verify: Option<bool>,
}

/// A policy applied within a vhost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Regex matched against queue and exchange names
    pub pattern: String,
    /// `queues`, `exchanges` or `all`; blank means `all`
    #[serde(default)]
    pub apply_to: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub definition: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VhostSpec {
    /// Defaults to the object name
    #[serde(default)]
    pub vhost_name: String,
    /// Do not create the companion owner user
    #[serde(default)]
    pub skip_user: bool,
    /// Policies keyed by a name unique within this vhost
    #[serde(default)]
    pub policies: BTreeMap<String, PolicySpec>,
    #[serde(default)]
    pub connection: ConnectionSpec,
}

/// Configure/write/read regexes for one vhost. A vhost of `*` applies the
/// rule to every vhost without an explicit entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub vhost: String,
    #[serde(default)]
    pub configure: String,
    #[serde(default)]
    pub write: String,
    #[serde(default)]
    pub read: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Defaults to the object name
    #[serde(default)]
    pub username: String,
    /// Comma-joined tags, e.g. `management,monitoring`
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    /// Publish the single granted vhost in the credential secret
    #[serde(default)]
    pub output_vhost: bool,
    #[serde(default)]
    pub connection: ConnectionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    /// Defaults to the object name
    #[serde(default)]
    pub queue_name: String,
    pub vhost: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<bool>,
    /// Queue arguments, a JSON object with scalar values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(default)]
    pub connection: ConnectionSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_spec_from_yaml() {
        let spec: UserSpec = serde_yaml::from_str(
            r#"
tags: management
outputVhost: true
permissions:
  - vhost: orders
    configure: ".*"
    write: ".*"
    read: ".*"
connection:
  host: rabbit.internal
  passwordSecretRef:
    name: rabbit-admin
"#,
        )
        .unwrap();
        assert!(spec.output_vhost);
        assert_eq!(spec.permissions[0].vhost, "orders");
        assert_eq!(spec.connection.host.as_deref(), Some("rabbit.internal"));
        assert_eq!(
            spec.connection.password_secret_ref.unwrap().key,
            String::new()
        );
    }

    #[test]
    fn test_queue_spec_optional_fields() {
        let spec: QueueSpec = serde_yaml::from_str(
            "vhost: testing\ndurable: true\narguments:\n  x-max-priority: 10\n",
        )
        .unwrap();
        assert_eq!(spec.durable, Some(true));
        assert_eq!(spec.auto_delete, None);
        assert_eq!(spec.arguments.unwrap()["x-max-priority"], 10);
    }
}
