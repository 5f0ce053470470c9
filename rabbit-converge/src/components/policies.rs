//! Policy sync for a vhost.
//!
//! Spec keys are namespaced by vhost (`{vhost}-{key}`) so policies from
//! different vhost objects never collide. Creates are applied first, then
//! updates, then deletes.

use std::collections::BTreeMap;

use rabbit_admin::{Policy, RabbitManager};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{expect_status, PassContext, Step, DELETED, UPSERTED};
use crate::diff::{plan, values_equal};
use crate::error::ConvergeError;
use crate::spec::PolicySpec;
use crate::status::POLICIES_READY;

/// `apply-to` value the broker uses when none is given.
pub const DEFAULT_APPLY_TO: &str = "all";

pub fn policy_name(vhost: &str, key: &str) -> String {
    format!("{}-{}", vhost, key)
}

fn apply_to(value: &str) -> &str {
    if value.is_empty() {
        DEFAULT_APPLY_TO
    } else {
        value
    }
}

/// Build the broker policy for one spec entry.
pub fn materialize(
    vhost: &str,
    key: &str,
    spec: &PolicySpec,
) -> Result<Policy, ConvergeError> {
    let mut definition = Map::new();
    for (def_key, value) in &spec.definition {
        match value {
            Value::String(_) | Value::Bool(_) | Value::Number(_) => {
                definition.insert(def_key.clone(), value.clone());
            }
            other => {
                return Err(ConvergeError::configuration(format!(
                    "error decoding definition {} value {} for policy {} in vhost {}",
                    def_key, other, key, vhost
                )))
            }
        }
    }

    Ok(Policy {
        vhost: vhost.to_string(),
        name: policy_name(vhost, key),
        pattern: spec.pattern.clone(),
        apply_to: apply_to(&spec.apply_to).to_string(),
        priority: spec.priority,
        definition,
    })
}

/// Deep equality of everything the broker stores for a policy.
pub fn same_policy(desired: &Policy, observed: &Policy) -> bool {
    desired.pattern == observed.pattern
        && apply_to(&desired.apply_to) == apply_to(&observed.apply_to)
        && desired.priority == observed.priority
        && values_equal(
            &Value::Object(desired.definition.clone()),
            &Value::Object(observed.definition.clone()),
        )
}

pub async fn converge(
    manager: &dyn RabbitManager,
    ctx: &mut PassContext<'_>,
    vhost: &str,
    policies: &BTreeMap<String, PolicySpec>,
) -> Result<Step, ConvergeError> {
    ctx.conditions.set_unknown(POLICIES_READY, "Unknown");

    let desired = policies
        .iter()
        .map(|(key, spec)| materialize(vhost, key, spec))
        .collect::<Result<Vec<_>, _>>()?;

    let observed = manager.list_policies_in(vhost).await.map_err(|e| {
        ConvergeError::dependency(format!("error fetching policies for vhost {}", vhost), e)
    })?;

    let ops = plan(
        desired,
        observed,
        |p: &Policy| p.name.clone(),
        |p: &Policy| p.name.clone(),
        same_policy,
    );

    if ops.is_noop() {
        debug!(vhost = %vhost, unchanged = ops.unchanged, "policies in sync");
    }

    let puts = ops
        .create
        .into_iter()
        .map(|policy| (policy, "PolicyCreated", "created"))
        .chain(
            ops.update
                .into_iter()
                .map(|(policy, _)| (policy, "PolicyUpdated", "updated")),
        );
    for (policy, reason, verb) in puts {
        let response = manager
            .put_policy(vhost, &policy.name, &policy)
            .await
            .map_err(|e| {
                ConvergeError::dependency(
                    format!("error putting policy {} for vhost {}", policy.name, vhost),
                    e,
                )
            })?;
        expect_status(&response, UPSERTED, || {
            format!("unable to put policy {} for vhost {}", policy.name, vhost)
        })?;

        info!(vhost = %vhost, policy = %policy.name, "{} policy", verb);
        ctx.record(
            reason,
            format!("RabbitMQ policy {} for vhost {} {}", policy.name, vhost, verb),
        )
        .await;
    }

    for stale in ops.delete {
        let response = manager
            .delete_policy(vhost, &stale.name)
            .await
            .map_err(|e| {
                ConvergeError::dependency(
                    format!("error deleting policy {} for vhost {}", stale.name, vhost),
                    e,
                )
            })?;
        expect_status(&response, DELETED, || {
            format!("unable to delete policy {} for vhost {}", stale.name, vhost)
        })?;

        info!(vhost = %vhost, policy = %stale.name, "deleted policy");
        ctx.record(
            "PolicyDeleted",
            format!("RabbitMQ policy {} for vhost {} deleted", stale.name, vhost),
        )
        .await;
    }

    ctx.conditions.set_true(POLICIES_READY, "PoliciesSynced", "");
    Ok(Step::done())
}
