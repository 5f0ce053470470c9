//! Double-ended diff between desired and observed collections.

use std::collections::BTreeMap;

use serde_json::Value;

/// Operations needed to turn `observed` into `desired`.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan<D, O> {
    /// Desired entries with no observed counterpart
    pub create: Vec<D>,
    /// Desired entries whose observed counterpart differs
    pub update: Vec<(D, O)>,
    /// Observed entries with no desired counterpart
    pub delete: Vec<O>,
    /// Number of entries already in the desired state
    pub unchanged: usize,
}

impl<D, O> Plan<D, O> {
    pub fn is_noop(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn mutation_count(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

/// Match desired against observed by key.
///
/// Observed entries are consumed as they are matched; whatever remains
/// afterwards is slated for deletion. Output follows key order. When several
/// desired entries share a key the last one wins.
pub fn plan<D, O, K, DesiredKey, ObservedKey, Same>(
    desired: impl IntoIterator<Item = D>,
    observed: impl IntoIterator<Item = O>,
    desired_key: DesiredKey,
    observed_key: ObservedKey,
    same: Same,
) -> Plan<D, O>
where
    K: Ord,
    DesiredKey: Fn(&D) -> K,
    ObservedKey: Fn(&O) -> K,
    Same: Fn(&D, &O) -> bool,
{
    let desired: BTreeMap<K, D> = desired.into_iter().map(|d| (desired_key(&d), d)).collect();
    let mut remaining: BTreeMap<K, O> = observed
        .into_iter()
        .map(|o| (observed_key(&o), o))
        .collect();

    let mut result = Plan {
        create: Vec::new(),
        update: Vec::new(),
        delete: Vec::new(),
        unchanged: 0,
    };

    for (key, wanted) in desired {
        match remaining.remove(&key) {
            None => result.create.push(wanted),
            Some(current) if same(&wanted, &current) => result.unchanged += 1,
            Some(current) => result.update.push((wanted, current)),
        }
    }

    result.delete = remaining.into_values().collect();
    result
}

/// Structural equality where numbers compare by value, so `10` equals `10.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Render a value the way it is written in a manifest: strings bare,
/// everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
