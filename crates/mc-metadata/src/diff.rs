//! Change detection and create/update/skip classification.

use serde_json::Value;

use crate::definition::TypeDefinition;
use crate::item::MetadataItem;

/// What to do with one local item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Create,
    Update,
    Skip,
}

/// Outcome of comparing a local item against its remote baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub action: UpsertAction,
    /// Updatable fields whose values differ; empty unless `action` is Update.
    pub changed: Vec<String>,
}

/// Compare scalars the way the APIs round-trip them: numbers and booleans
/// may come back as strings, and null is the same as absent.
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => value_equal(a, b),
        _ => false,
    }
}

fn value_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            s.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| value_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => x
            .keys()
            .chain(y.keys())
            .all(|k| values_equal(x.get(k), y.get(k))),
        _ => a == b,
    }
}

/// Updatable fields of `candidate` that differ from `baseline`.
///
/// Only fields present in the candidate are compared, so a field the local
/// file leaves out never counts as a change.
pub fn changed_fields(def: &TypeDefinition, baseline: &MetadataItem, candidate: &MetadataItem) -> Vec<String> {
    candidate
        .iter()
        .filter(|(name, _)| def.is_diffed(name))
        .filter(|(name, value)| !values_equal(baseline.get(*name), Some(value)))
        .map(|(name, _)| name.clone())
        .collect()
}

/// Whether an update call is needed at all.
pub fn has_changed(def: &TypeDefinition, baseline: &MetadataItem, candidate: &MetadataItem) -> bool {
    !changed_fields(def, baseline, candidate).is_empty()
}

/// Classify from an optional baseline and the changed field list.
pub fn classify(baseline: Option<&MetadataItem>, changed: Vec<String>) -> DiffResult {
    match baseline {
        None => DiffResult {
            action: UpsertAction::Create,
            changed: Vec::new(),
        },
        Some(_) if changed.is_empty() => DiffResult {
            action: UpsertAction::Skip,
            changed,
        },
        Some(_) => DiffResult {
            action: UpsertAction::Update,
            changed,
        },
    }
}
