//! Permission sync with wildcard expansion.
//!
//! Concrete entries are keyed by vhost. A `*` entry is expanded over every
//! vhost the broker knows that has no explicit entry. The result is diffed
//! against the user's current permissions: missing vhosts are granted,
//! differing ones rewritten, and vhosts no longer desired are cleared.

use std::collections::BTreeMap;

use rabbit_admin::{PermissionInfo, Permissions, RabbitManager};
use tracing::{debug, info};

use super::{expect_status, PassContext, Step, DELETED, UPSERTED};
use crate::diff::plan;
use crate::error::ConvergeError;
use crate::spec::PermissionEntry;
use crate::status::PERMISSIONS_READY;
use crate::watch::WILDCARD_VHOST;

fn rule(entry: &PermissionEntry) -> Permissions {
    Permissions {
        configure: entry.configure.clone(),
        write: entry.write.clone(),
        read: entry.read.clone(),
    }
}

/// Split entries into the explicit per-vhost map and the wildcard rule.
pub fn partition(entries: &[PermissionEntry]) -> (BTreeMap<String, Permissions>, Option<Permissions>) {
    let mut explicit = BTreeMap::new();
    let mut wildcard = None;
    for entry in entries {
        if entry.vhost == WILDCARD_VHOST {
            wildcard = Some(rule(entry));
        } else {
            explicit.insert(entry.vhost.clone(), rule(entry));
        }
    }
    (explicit, wildcard)
}

/// Fill in the wildcard rule for every known vhost without an explicit entry.
pub fn expand(
    mut explicit: BTreeMap<String, Permissions>,
    wildcard: Option<&Permissions>,
    known_vhosts: impl IntoIterator<Item = String>,
) -> BTreeMap<String, Permissions> {
    if let Some(wildcard) = wildcard {
        for vhost in known_vhosts {
            explicit.entry(vhost).or_insert_with(|| wildcard.clone());
        }
    }
    explicit
}

pub async fn converge(
    manager: &dyn RabbitManager,
    ctx: &mut PassContext<'_>,
    username: &str,
    entries: &[PermissionEntry],
) -> Result<Step, ConvergeError> {
    ctx.conditions.set_unknown(PERMISSIONS_READY, "Unknown");

    let (explicit, wildcard) = partition(entries);
    let desired = match wildcard {
        Some(wildcard) => {
            let vhosts = manager.list_vhosts().await.map_err(|e| {
                ConvergeError::dependency("error listing vhosts for * vhost permissions", e)
            })?;
            expand(explicit, Some(&wildcard), vhosts.into_iter().map(|v| v.name))
        }
        None => explicit,
    };

    let observed = manager.list_permissions_of(username).await.map_err(|e| {
        ConvergeError::dependency(format!("error listing permissions for user {}", username), e)
    })?;

    let ops = plan(
        desired,
        observed,
        |(vhost, _)| vhost.clone(),
        |info: &PermissionInfo| info.vhost.clone(),
        |(_, want), have| *want == have.permissions(),
    );

    if ops.is_noop() {
        debug!(user = %username, unchanged = ops.unchanged, "permissions in sync");
    }

    let grants = ops
        .create
        .into_iter()
        .map(|grant| (grant, "PermissionsCreated", "created"))
        .chain(
            ops.update
                .into_iter()
                .map(|(grant, _)| (grant, "PermissionsUpdated", "updated")),
        );
    for ((vhost, permissions), reason, verb) in grants {
        let response = manager
            .update_permissions_in(&vhost, username, &permissions)
            .await
            .map_err(|e| {
                ConvergeError::dependency(
                    format!("error updating permissions for user {} and vhost {}", username, vhost),
                    e,
                )
            })?;
        expect_status(&response, UPSERTED, || {
            format!("unable to update permissions for user {} and vhost {}", username, vhost)
        })?;

        info!(user = %username, vhost = %vhost, "{} permissions", verb);
        ctx.record(
            reason,
            format!(
                "RabbitMQ permissions for user {} in vhost {} {}",
                username, vhost, verb
            ),
        )
        .await;
    }

    for stale in ops.delete {
        let vhost = stale.vhost;
        let response = manager
            .clear_permissions_in(&vhost, username)
            .await
            .map_err(|e| {
                ConvergeError::dependency(
                    format!("error removing permissions for user {} and vhost {}", username, vhost),
                    e,
                )
            })?;
        expect_status(&response, DELETED, || {
            format!("unable to remove permissions for user {} and vhost {}", username, vhost)
        })?;

        info!(user = %username, vhost = %vhost, "removed permissions");
        ctx.record(
            "PermissionsDeleted",
            format!(
                "RabbitMQ permissions for user {} in vhost {} deleted",
                username, vhost
            ),
        )
        .await;
    }

    ctx.conditions
        .set_true(PERMISSIONS_READY, "PermissionsSynced", "");
    Ok(Step::done())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventLog;
    use crate::resource::{ObjectKey, ResourceKind};
    use crate::status::{ConditionStatus, Conditions};
    use rabbit_admin::{MockCall, MockRabbitManager};

    fn entry(vhost: &str, pattern: &str) -> PermissionEntry {
        PermissionEntry {
            vhost: vhost.to_string(),
            configure: pattern.to_string(),
            write: pattern.to_string(),
            read: pattern.to_string(),
        }
    }

    fn perms(pattern: &str) -> Permissions {
        Permissions {
            configure: pattern.to_string(),
            write: pattern.to_string(),
            read: pattern.to_string(),
        }
    }

    fn info(vhost: &str, pattern: &str) -> PermissionInfo {
        PermissionInfo {
            user: "app".to_string(),
            vhost: vhost.to_string(),
            configure: pattern.to_string(),
            write: pattern.to_string(),
            read: pattern.to_string(),
        }
    }

    #[test]
    fn test_explicit_entry_beats_wildcard() {
        let (explicit, wildcard) = partition(&[entry("*", ".*"), entry("v1", "^app")]);
        let desired = expand(
            explicit,
            wildcard.as_ref(),
            vec!["v1".to_string(), "v2".to_string()],
        );

        assert_eq!(desired.len(), 2);
        assert_eq!(desired["v1"], perms("^app"));
        assert_eq!(desired["v2"], perms(".*"));
    }

    #[test]
    fn test_no_wildcard_ignores_known_vhosts() {
        let (explicit, wildcard) = partition(&[entry("v1", ".*")]);
        let desired = expand(explicit, wildcard.as_ref(), vec!["v2".to_string()]);
        assert_eq!(desired.keys().collect::<Vec<_>>(), vec!["v1"]);
    }

    #[tokio::test]
    async fn test_double_ended_diff() {
        let broker = MockRabbitManager::new()
            .with_permission(info("keep", ".*"))
            .with_permission(info("change", "^old"))
            .with_permission(info("stale", ".*"));
        let events = EventLog::new();
        let config = EngineConfig::default();
        let key = ObjectKey::new(ResourceKind::User, "default", "app");
        let mut conditions = Conditions::new();

        let mut ctx = PassContext::new(&key, &mut conditions, &events, &config);
        converge(
            &broker,
            &mut ctx,
            "app",
            &[entry("keep", ".*"), entry("change", "^new"), entry("fresh", ".*")],
        )
        .await
        .unwrap();

        assert_eq!(
            broker.mutations(),
            vec![
                MockCall::UpdatePermissions {
                    vhost: "fresh".to_string(),
                    username: "app".to_string(),
                    permissions: perms(".*"),
                },
                MockCall::UpdatePermissions {
                    vhost: "change".to_string(),
                    username: "app".to_string(),
                    permissions: perms("^new"),
                },
                MockCall::ClearPermissions {
                    vhost: "stale".to_string(),
                    username: "app".to_string(),
                },
            ]
        );

        let reasons: Vec<String> = events.all().await.into_iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            vec!["PermissionsCreated", "PermissionsUpdated", "PermissionsDeleted"]
        );
        assert_eq!(conditions.status_of(PERMISSIONS_READY), ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_wildcard_lists_vhosts() {
        let broker = MockRabbitManager::new().with_vhost("v1").with_vhost("v2");
        let events = EventLog::new();
        let config = EngineConfig::default();
        let key = ObjectKey::new(ResourceKind::User, "default", "app");
        let mut conditions = Conditions::new();

        let mut ctx = PassContext::new(&key, &mut conditions, &events, &config);
        converge(&broker, &mut ctx, "app", &[entry("*", ".*"), entry("v1", "^app")])
            .await
            .unwrap();

        let granted = broker.permissions_of("app");
        assert_eq!(granted["v1"], perms("^app"));
        assert_eq!(granted["v2"], perms(".*"));
    }

    #[tokio::test]
    async fn test_listing_failure_aborts() {
        let broker = MockRabbitManager::new().with_status("list_vhosts", 503);
        let events = EventLog::new();
        let config = EngineConfig::default();
        let key = ObjectKey::new(ResourceKind::User, "default", "app");
        let mut conditions = Conditions::new();

        let mut ctx = PassContext::new(&key, &mut conditions, &events, &config);
        let err = converge(&broker, &mut ctx, "app", &[entry("*", ".*")])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(broker.mutation_count(), 0);
        assert_eq!(conditions.status_of(PERMISSIONS_READY), ConditionStatus::Unknown);
    }
}
