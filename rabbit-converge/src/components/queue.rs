//! Queue existence and drift detection.
//!
//! A missing queue is declared with the requested settings. An existing
//! queue is never redeclared: every explicitly set field is compared against
//! the broker and any mismatch is reported as drift, retried after the drift
//! delay without touching the queue.

use rabbit_admin::{QueueInfo, QueueSettings, RabbitManager};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::{expect_status, PassContext, Step, CREATED, DELETED};
use crate::diff::{display_value, plan, values_equal};
use crate::error::ConvergeError;
use crate::spec::QueueSpec;
use crate::status::QUEUE_READY;

/// Queue arguments from the spec as a JSON object.
pub fn arguments(spec: &QueueSpec) -> Result<Map<String, Value>, ConvergeError> {
    match &spec.arguments {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(other) => Err(ConvergeError::configuration(format!(
            "error parsing arguments: expected an object, got {}",
            other
        ))),
    }
}

/// Human readable differences between the spec and an observed queue.
///
/// Only fields set in the spec are compared, and only arguments named in
/// the spec; extra arguments on the broker are ignored.
pub fn drift(spec: &QueueSpec, observed: &QueueInfo) -> Result<Vec<String>, ConvergeError> {
    let mut diffs = Vec::new();

    if let Some(auto_delete) = spec.auto_delete {
        if observed.auto_delete != auto_delete {
            diffs.push(format!(
                "AutoDelete currently {} expecting {}",
                observed.auto_delete, auto_delete
            ));
        }
    }
    if let Some(durable) = spec.durable {
        if observed.durable != durable {
            diffs.push(format!(
                "Durable currently {} expecting {}",
                observed.durable, durable
            ));
        }
    }

    if spec.arguments.is_some() {
        let args = plan(
            arguments(spec)?,
            observed.arguments.clone(),
            |(k, _)| k.clone(),
            |(k, _)| k.clone(),
            |(_, want), (_, have)| values_equal(want, have),
        );
        for (key, want) in args.create {
            diffs.push(format!(
                "Argument {} currently <not set> expecting {}",
                key,
                display_value(&want)
            ));
        }
        for ((key, want), (_, have)) in args.update {
            diffs.push(format!(
                "Argument {} currently {} expecting {}",
                key,
                display_value(&have),
                display_value(&want)
            ));
        }
    }

    Ok(diffs)
}

pub async fn converge(
    manager: &dyn RabbitManager,
    ctx: &mut PassContext<'_>,
    queue: &str,
    spec: &QueueSpec,
) -> Result<Step, ConvergeError> {
    ctx.conditions.set_unknown(QUEUE_READY, "Unknown");
    let vhost = spec.vhost.as_str();

    let existing = match manager.get_queue(vhost, queue).await {
        Ok(info) => Some(info),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            return Err(ConvergeError::dependency(
                format!("error getting queue {} on vhost {}", queue, vhost),
                e,
            ))
        }
    };

    match existing {
        None => {
            let settings = QueueSettings {
                durable: spec.durable.unwrap_or(false),
                auto_delete: spec.auto_delete.unwrap_or(false),
                arguments: arguments(spec)?,
            };
            let response = manager
                .declare_queue(vhost, queue, &settings)
                .await
                .map_err(|e| {
                    ConvergeError::dependency(
                        format!("error creating queue {} on vhost {}", queue, vhost),
                        e,
                    )
                })?;
            expect_status(&response, CREATED, || {
                format!("unable to create queue {} on vhost {}", queue, vhost)
            })?;

            info!(vhost = %vhost, queue = %queue, "declared queue");
            ctx.record(
                "QueueCreated",
                format!("RabbitMQ queue {} on vhost {} created", queue, vhost),
            )
            .await;
        }
        Some(observed) => {
            let diffs = drift(spec, &observed)?;
            if !diffs.is_empty() {
                warn!(vhost = %vhost, queue = %queue, ?diffs, "queue drifted from spec");
                return Err(ConvergeError::Drift {
                    subject: format!("queue {} on vhost {}", queue, vhost),
                    diffs,
                });
            }
            debug!(vhost = %vhost, queue = %queue, "queue matches spec");
        }
    }

    ctx.conditions.set_true(
        QUEUE_READY,
        "QueueExists",
        format!("RabbitMQ queue {} on vhost {} exists", queue, vhost),
    );
    Ok(Step::done())
}

pub async fn finalize(
    manager: &dyn RabbitManager,
    vhost: &str,
    queue: &str,
) -> Result<(), ConvergeError> {
    let response = manager.delete_queue(vhost, queue).await.map_err(|e| {
        ConvergeError::dependency(
            format!("error deleting queue {} on vhost {}", queue, vhost),
            e,
        )
    })?;
    expect_status(&response, DELETED, || {
        format!("unable to delete queue {} on vhost {}", queue, vhost)
    })?;
    info!(vhost = %vhost, queue = %queue, "deleted queue");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventLog;
    use crate::resource::{ObjectKey, ResourceKind};
    use crate::status::{ConditionStatus, Conditions};
    use rabbit_admin::MockRabbitManager;
    use serde_json::json;

    fn spec(durable: Option<bool>, arguments: Option<Value>) -> QueueSpec {
        QueueSpec {
            queue_name: "orders".to_string(),
            vhost: "testing".to_string(),
            durable,
            arguments,
            ..Default::default()
        }
    }

    fn observed(durable: bool, arguments: Value) -> QueueInfo {
        QueueInfo {
            name: "orders".to_string(),
            vhost: "testing".to_string(),
            durable,
            auto_delete: false,
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_drift_compares_only_set_fields() {
        let diffs = drift(
            &spec(None, None),
            &observed(true, json!({"x-queue-type": "classic"})),
        )
        .unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_drift_messages() {
        let diffs = drift(
            &spec(
                Some(true),
                Some(json!({"x-max-priority": 10, "x-queue-mode": "lazy"})),
            ),
            &observed(false, json!({"x-max-priority": 20, "x-extra": 1})),
        )
        .unwrap();
        assert_eq!(
            diffs,
            vec![
                "Durable currently false expecting true",
                "Argument x-queue-mode currently <not set> expecting lazy",
                "Argument x-max-priority currently 20 expecting 10",
            ]
        );
    }

    #[test]
    fn test_numeric_arguments_compare_by_value() {
        let diffs = drift(
            &spec(None, Some(json!({"x-message-ttl": 60000}))),
            &observed(false, json!({"x-message-ttl": 60000.0})),
        )
        .unwrap();
        assert!(diffs.is_empty());
    }

    #[test]
    fn test_arguments_must_be_object() {
        assert!(matches!(
            arguments(&spec(None, Some(json!(["x"])))),
            Err(ConvergeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_declares_missing_queue() {
        let broker = MockRabbitManager::new().with_vhost("testing");
        let events = EventLog::new();
        let config = EngineConfig::default();
        let key = ObjectKey::new(ResourceKind::Queue, "default", "orders");
        let mut conditions = Conditions::new();
        let spec = spec(Some(true), Some(json!({"x-max-priority": 10})));

        let mut ctx = PassContext::new(&key, &mut conditions, &events, &config);
        converge(&broker, &mut ctx, "orders", &spec).await.unwrap();

        let queue = broker.queue("testing", "orders").unwrap();
        assert!(queue.durable);
        assert_eq!(queue.arguments["x-max-priority"], 10);
        assert_eq!(events.recent(1).await[0].reason, "QueueCreated");
        assert_eq!(conditions.status_of(QUEUE_READY), ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_drift_is_reported_not_repaired() {
        let broker = MockRabbitManager::new()
            .with_queue(observed(true, json!({"x-max-priority": 20})));
        let events = EventLog::new();
        let config = EngineConfig::default();
        let key = ObjectKey::new(ResourceKind::Queue, "default", "orders");
        let mut conditions = Conditions::new();
        let spec = spec(Some(true), Some(json!({"x-max-priority": 10})));

        let mut ctx = PassContext::new(&key, &mut conditions, &events, &config);
        let err = converge(&broker, &mut ctx, "orders", &spec)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "queue orders on vhost testing settings do not match: Argument x-max-priority currently 20 expecting 10"
        );
        assert_eq!(err.requeue_after(&config), Some(config.drift_requeue()));
        assert_eq!(broker.mutation_count(), 0);
        assert_eq!(events.count().await, 0);
    }
}
