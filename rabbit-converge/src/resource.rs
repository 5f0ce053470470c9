//! Declarative objects: metadata, spec and status.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::spec::{QueueSpec, UserSpec, VhostSpec};
use crate::status::Conditions;

/// Identity of an object in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Object that generated this one, if it was not declared directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ObjectKey>,
}

/// Observed outcome of the most recent pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    #[serde(default)]
    pub conditions: Conditions,
}

impl ResourceStatus {
    /// Whether the aggregate `Ready` condition is true.
    pub fn is_ready(&self) -> bool {
        self.conditions.is_true(crate::status::READY)
    }
}

/// A desired specification together with its identity and status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource<S> {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: S,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl<S> Resource<S> {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: S) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                owner: None,
            },
            spec,
            status: ResourceStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "RabbitVhost")]
    Vhost,
    #[serde(rename = "RabbitUser")]
    User,
    #[serde(rename = "RabbitQueue")]
    Queue,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vhost => "RabbitVhost",
            ResourceKind::User => "RabbitUser",
            ResourceKind::Queue => "RabbitQueue",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind plus namespaced name; the unit of scheduling.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn for_meta(kind: ResourceKind, meta: &ObjectMeta) -> Self {
        Self::new(kind, meta.namespace.clone(), meta.name.clone())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Any object the engine reconciles, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    RabbitVhost(Resource<VhostSpec>),
    RabbitUser(Resource<UserSpec>),
    RabbitQueue(Resource<QueueSpec>),
}

impl Manifest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Manifest::RabbitVhost(_) => ResourceKind::Vhost,
            Manifest::RabbitUser(_) => ResourceKind::User,
            Manifest::RabbitQueue(_) => ResourceKind::Queue,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Manifest::RabbitVhost(r) => &r.metadata,
            Manifest::RabbitUser(r) => &r.metadata,
            Manifest::RabbitQueue(r) => &r.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::for_meta(self.kind(), self.metadata())
    }

    pub fn status(&self) -> &ResourceStatus {
        match self {
            Manifest::RabbitVhost(r) => &r.status,
            Manifest::RabbitUser(r) => &r.status,
            Manifest::RabbitQueue(r) => &r.status,
        }
    }

    pub fn status_mut(&mut self) -> &mut ResourceStatus {
        match self {
            Manifest::RabbitVhost(r) => &mut r.status,
            Manifest::RabbitUser(r) => &mut r.status,
            Manifest::RabbitQueue(r) => &mut r.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_kind_tag() {
        let manifest: Manifest = serde_yaml::from_str(
            r#"
apiVersion: rabbitmq.coderanger.net/v1beta1
kind: RabbitVhost
metadata:
  name: testing
  namespace: default
spec:
  policies:
    ha:
      pattern: ".*"
      definition:
        ha-mode: all
"#,
        )
        .unwrap();

        assert_eq!(manifest.kind(), ResourceKind::Vhost);
        assert_eq!(
            manifest.key(),
            ObjectKey::new(ResourceKind::Vhost, "default", "testing")
        );
        match manifest {
            Manifest::RabbitVhost(vhost) => {
                assert!(vhost.spec.policies.contains_key("ha"));
                assert!(vhost.status.conditions.is_empty());
            }
            other => panic!("unexpected manifest {:?}", other.kind()),
        }
    }

    #[test]
    fn test_key_display() {
        let key = ObjectKey::new(ResourceKind::User, "apps", "orders");
        assert_eq!(key.to_string(), "RabbitUser apps/orders");
    }
}
