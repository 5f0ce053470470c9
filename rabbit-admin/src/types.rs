//! Wire types for the RabbitMQ management API.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A virtual host as reported by `GET /api/vhosts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhostInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl VhostInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Body of `PUT /api/vhosts/{vhost}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VhostSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// User tags.
///
/// Older brokers report tags as a comma-joined string, newer ones as an
/// array. Both forms deserialize; serialization always uses the string form,
/// which every broker version accepts on `PUT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserTags(pub Vec<String>);

impl UserTags {
    /// Parse a comma-joined tag string, dropping blanks.
    pub fn parse(tags: &str) -> Self {
        Self(
            tags.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl Serialize for UserTags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.joined())
    }
}

impl<'de> Deserialize<'de> for UserTags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawTags {
            Joined(String),
            List(Vec<String>),
        }

        Ok(match Option::<RawTags>::deserialize(deserializer)? {
            Some(RawTags::Joined(joined)) => UserTags::parse(&joined),
            Some(RawTags::List(list)) => UserTags::parse(&list.join(",")),
            None => UserTags::default(),
        })
    }
}

/// A user as reported by `GET /api/users/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub hashing_algorithm: String,
    #[serde(default)]
    pub tags: UserTags,
}

/// Body of `PUT /api/users/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub password_hash: String,
    pub hashing_algorithm: String,
    pub tags: UserTags,
}

/// Body of `PUT /api/permissions/{vhost}/{user}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

/// One entry of `GET /api/users/{name}/permissions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    pub user: String,
    pub vhost: String,
    pub configure: String,
    pub write: String,
    pub read: String,
}

impl PermissionInfo {
    pub fn permissions(&self) -> Permissions {
        Permissions {
            configure: self.configure.clone(),
            write: self.write.clone(),
            read: self.read.clone(),
        }
    }
}

/// A policy, used both for `GET /api/policies/{vhost}` and as the `PUT` body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub vhost: String,
    #[serde(default)]
    pub name: String,
    pub pattern: String,
    #[serde(rename = "apply-to", default)]
    pub apply_to: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub definition: Map<String, Value>,
}

/// A queue as reported by `GET /api/queues/{vhost}/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub vhost: String,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Body of `PUT /api/queues/{vhost}/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub durable: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Outcome of a mutating management call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Raw response body (often empty)
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the status is one of `expected`.
    pub fn is_one_of(&self, expected: &[u16]) -> bool {
        expected.contains(&self.status)
    }

    /// Human readable failure detail.
    ///
    /// The broker answers errors with `{"error": ..., "reason": ...}`; the
    /// reason is preferred when the body parses, otherwise the raw body.
    pub fn reason(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<String>,
            reason: Option<String>,
        }

        match serde_json::from_str::<ErrorBody>(&self.body) {
            Ok(ErrorBody {
                reason: Some(reason),
                ..
            }) => reason,
            Ok(ErrorBody {
                error: Some(error),
                ..
            }) => error,
            _ => self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_from_string_and_list() {
        let joined: UserInfo =
            serde_json::from_str(r#"{"name":"a","tags":"administrator, monitoring"}"#).unwrap();
        let listed: UserInfo =
            serde_json::from_str(r#"{"name":"a","tags":["administrator","monitoring"]}"#).unwrap();
        assert_eq!(joined.tags, listed.tags);
        assert_eq!(joined.tags.joined(), "administrator,monitoring");
    }

    #[test]
    fn test_tags_serialize_as_string() {
        let settings = UserSettings {
            password_hash: "x".to_string(),
            hashing_algorithm: "rabbit_password_hashing_sha256".to_string(),
            tags: UserTags::parse("management"),
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["tags"], "management");
    }

    #[test]
    fn test_policy_apply_to_rename() {
        let policy: Policy = serde_json::from_str(
            r#"{"vhost":"v","name":"v-ha","pattern":".*","apply-to":"queues","definition":{"ha-mode":"all"},"priority":1}"#,
        )
        .unwrap();
        assert_eq!(policy.apply_to, "queues");
        assert_eq!(policy.definition["ha-mode"], "all");
    }

    #[test]
    fn test_response_reason() {
        let response = ApiResponse::new(400)
            .with_body(r#"{"error":"bad_request","reason":"inequivalent arg 'durable'"}"#);
        assert_eq!(response.reason(), "inequivalent arg 'durable'");
        assert!(!response.is_success());
        assert_eq!(ApiResponse::new(500).with_body("boom").reason(), "boom");
    }
}
