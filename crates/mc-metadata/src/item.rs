//! Item and collection aliases shared by every metadata type.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::path;

/// One remote entity: field name to value.
pub type MetadataItem = Map<String, Value>;

/// All known items of one type in one business unit, keyed by the key field.
pub type MetadataTypeMap = BTreeMap<String, MetadataItem>;

/// Type name to the set of keys selected for that type.
pub type TypeKeyCombo = BTreeMap<String, BTreeSet<String>>;

/// Read a key-like field as a string.
pub fn field_string(item: &MetadataItem, field: &str) -> Option<String> {
    path::lookup_in(item, field)
        .and_then(path::scalar_string)
        .filter(|s| !s.is_empty())
}

/// Build a type map from a list of JSON objects, dropping entries without
/// a key.
pub fn to_type_map(items: impl IntoIterator<Item = Value>, key_field: &str) -> MetadataTypeMap {
    items
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(item) => Some(item),
            _ => None,
        })
        .filter_map(|item| field_string(&item, key_field).map(|key| (key, item)))
        .collect()
}

/// Add `key` under `metadata_type`, returning true when it was not present.
pub fn combo_insert(combo: &mut TypeKeyCombo, metadata_type: &str, key: &str) -> bool {
    combo
        .entry(metadata_type.to_string())
        .or_default()
        .insert(key.to_string())
}

/// Whether `key` is present under `metadata_type`.
pub fn combo_contains(combo: &TypeKeyCombo, metadata_type: &str, key: &str) -> bool {
    combo
        .get(metadata_type)
        .is_some_and(|keys| keys.contains(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_type_map_keys_by_field() {
        let map = to_type_map(
            vec![
                json!({"key": "a", "name": "A"}),
                json!({"key": 7}),
                json!({"name": "no key"}),
                json!("not an object"),
            ],
            "key",
        );
        assert_eq!(map.len(), 2);
        assert!(map.contains_key("a"));
        assert!(map.contains_key("7"));
    }

    #[test]
    fn test_combo_insert_guards_duplicates() {
        let mut combo = TypeKeyCombo::new();
        assert!(combo_insert(&mut combo, "folder", "Query"));
        assert!(!combo_insert(&mut combo, "folder", "Query"));
        assert!(combo_contains(&combo, "folder", "Query"));
        assert!(!combo_contains(&combo, "query", "Query"));
    }
}
