//! Wildcard watch index.
//!
//! Users holding a `*` permission entry depend on the set of vhosts. When a
//! vhost appears those users must be reconciled again. The mapping is a
//! derived lookup over the current user objects, recomputed on demand.

use tracing::debug;

use crate::capability::{ObjectStore, StoreError};
use crate::resource::{ObjectKey, Resource, ResourceKind};
use crate::spec::UserSpec;

/// Pseudo-vhost standing for every vhost.
pub const WILDCARD_VHOST: &str = "*";

pub fn has_wildcard(spec: &UserSpec) -> bool {
    spec.permissions.iter().any(|p| p.vhost == WILDCARD_VHOST)
}

/// Users to reconcile again when a vhost appears.
pub fn users_affected_by_vhost(users: &[Resource<UserSpec>]) -> Vec<ObjectKey> {
    users
        .iter()
        .filter(|user| has_wildcard(&user.spec))
        .map(|user| ObjectKey::for_meta(ResourceKind::User, &user.metadata))
        .collect()
}

/// Look up dependents of a vhost in the object store.
pub async fn dependents_of_vhost(store: &dyn ObjectStore) -> Result<Vec<ObjectKey>, StoreError> {
    let users = store.list_users().await?;
    let affected = users_affected_by_vhost(&users);
    debug!(users = users.len(), affected = affected.len(), "wildcard lookup");
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::resource::Manifest;
    use crate::spec::PermissionEntry;

    fn user(name: &str, namespace: &str, vhosts: &[&str]) -> Resource<UserSpec> {
        Resource::new(
            name,
            namespace,
            UserSpec {
                permissions: vhosts
                    .iter()
                    .map(|v| PermissionEntry {
                        vhost: v.to_string(),
                        configure: ".*".to_string(),
                        write: ".*".to_string(),
                        read: ".*".to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_only_wildcard_users_affected() {
        let users = vec![
            user("admin", "ops", &["*"]),
            user("app", "apps", &["orders"]),
            user("mixed", "apps", &["orders", "*"]),
        ];
        assert_eq!(
            users_affected_by_vhost(&users),
            vec![
                ObjectKey::new(ResourceKind::User, "ops", "admin"),
                ObjectKey::new(ResourceKind::User, "apps", "mixed"),
            ]
        );
    }

    #[tokio::test]
    async fn test_lookup_across_namespaces() {
        let store = MemoryStore::new();
        store.insert(Manifest::RabbitUser(user("admin", "ops", &["*"])));
        store.insert(Manifest::RabbitUser(user("app", "apps", &["orders"])));
        store.insert(Manifest::RabbitUser(user("monitor", "apps", &["*"])));

        let keys = dependents_of_vhost(&store).await.unwrap();
        assert_eq!(
            keys,
            vec![
                ObjectKey::new(ResourceKind::User, "apps", "monitor"),
                ObjectKey::new(ResourceKind::User, "ops", "admin"),
            ]
        );
    }
}
