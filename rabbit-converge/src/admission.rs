//! Admission: defaulting and validation before an object is reconciled.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::debug;

use crate::error::ConvergeError;
use crate::resource::{Manifest, Resource};
use crate::spec::{QueueSpec, UserSpec, VhostSpec};

/// High-availability modes the broker understands.
pub const HA_MODES: &[&str] = &["all", "exactly", "nodes"];

pub trait Admission {
    /// Fill in fields derived from the object's identity.
    fn apply_defaults(&mut self);

    /// Reject specs the engine cannot act on.
    fn validate(&self) -> Result<(), ConvergeError>;

    /// Default then validate.
    fn admit(&mut self) -> Result<(), ConvergeError> {
        self.apply_defaults();
        self.validate()
    }
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Bool(_) | Value::Number(_))
}

impl Admission for Resource<VhostSpec> {
    fn apply_defaults(&mut self) {
        if self.spec.vhost_name.is_empty() {
            self.spec.vhost_name = self.metadata.name.clone();
        }
    }

    fn validate(&self) -> Result<(), ConvergeError> {
        debug!(name = %self.metadata.name, namespace = %self.metadata.namespace, "validate vhost");
        for (name, policy) in &self.spec.policies {
            for (key, value) in &policy.definition {
                if key == "ha-mode" {
                    let mode = value.as_str().ok_or_else(|| {
                        ConvergeError::validation(format!(
                            "policy {} ha-mode value is not a string: {}",
                            name, value
                        ))
                    })?;
                    if !HA_MODES.contains(&mode) {
                        return Err(ConvergeError::validation(format!(
                            "policy {} ha-mode value is not a known HA mode: {}",
                            name, mode
                        )));
                    }
                } else if !is_scalar(value) {
                    return Err(ConvergeError::validation(format!(
                        "policy {} {} value is not a string, boolean, or number: {}",
                        name, key, value
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Admission for Resource<UserSpec> {
    fn apply_defaults(&mut self) {
        if self.spec.username.is_empty() {
            self.spec.username = self.metadata.name.clone();
        }
    }

    fn validate(&self) -> Result<(), ConvergeError> {
        debug!(name = %self.metadata.name, namespace = %self.metadata.namespace, "validate user");
        let mut seen = BTreeSet::new();
        for entry in &self.spec.permissions {
            if !seen.insert(entry.vhost.as_str()) {
                return Err(ConvergeError::validation(format!(
                    "Duplicate permissions for vhost {}",
                    entry.vhost
                )));
            }
        }
        if self.spec.output_vhost && self.spec.permissions.len() != 1 {
            return Err(ConvergeError::validation(
                "outputVhost can only be used with permissions for exactly one vhost",
            ));
        }
        Ok(())
    }
}

impl Admission for Resource<QueueSpec> {
    fn apply_defaults(&mut self) {
        if self.spec.queue_name.is_empty() {
            self.spec.queue_name = self.metadata.name.clone();
        }
    }

    fn validate(&self) -> Result<(), ConvergeError> {
        debug!(name = %self.metadata.name, namespace = %self.metadata.namespace, "validate queue");
        if self.spec.vhost.is_empty() {
            return Err(ConvergeError::validation("vhost is required"));
        }
        match &self.spec.arguments {
            None | Some(Value::Null) => Ok(()),
            Some(Value::Object(args)) => {
                for (key, value) in args {
                    if !is_scalar(value) {
                        return Err(ConvergeError::validation(format!(
                            "argument {} has an invalid value: {}",
                            key, value
                        )));
                    }
                }
                Ok(())
            }
            Some(other) => Err(ConvergeError::validation(format!(
                "error parsing arguments: expected an object, got {}",
                other
            ))),
        }
    }
}

impl Admission for Manifest {
    fn apply_defaults(&mut self) {
        match self {
            Manifest::RabbitVhost(r) => r.apply_defaults(),
            Manifest::RabbitUser(r) => r.apply_defaults(),
            Manifest::RabbitQueue(r) => r.apply_defaults(),
        }
    }

    fn validate(&self) -> Result<(), ConvergeError> {
        match self {
            Manifest::RabbitVhost(r) => r.validate(),
            Manifest::RabbitUser(r) => r.validate(),
            Manifest::RabbitQueue(r) => r.validate(),
        }
    }
}
