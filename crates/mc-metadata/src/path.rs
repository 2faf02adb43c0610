//! Dot-path access into JSON trees.
//!
//! Paths are `.`-separated segments. A segment addresses an object field, or
//! an array element when it parses as an index. A key that itself contains
//! dots (SOAP property names such as `ParentFolder.ID`) is matched literally
//! before the path is split.

use serde_json::{Map, Value};

/// Outcome of resolving a path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathLookup<'a> {
    /// The path resolved to a value.
    Found(&'a Value),
    /// A segment does not exist.
    Missing { segment: String },
    /// A segment addresses into a value that is not a container.
    WrongType {
        segment: String,
        found: &'static str,
    },
}

impl<'a> PathLookup<'a> {
    /// The resolved value, if any.
    pub fn found(self) -> Option<&'a Value> {
        match self {
            PathLookup::Found(v) => Some(v),
            _ => None,
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Resolve `path` inside `value`.
pub fn lookup<'a>(value: &'a Value, path: &str) -> PathLookup<'a> {
    if let Some(direct) = value.as_object().and_then(|o| o.get(path)) {
        return PathLookup::Found(direct);
    }

    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => match map.get(segment) {
                Some(v) => v,
                None => {
                    return PathLookup::Missing {
                        segment: segment.to_string(),
                    }
                }
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => {
                    return PathLookup::Missing {
                        segment: segment.to_string(),
                    }
                }
            },
            other => {
                return PathLookup::WrongType {
                    segment: segment.to_string(),
                    found: type_name(other),
                }
            }
        };
    }
    PathLookup::Found(current)
}

/// Resolve `path` inside an item map.
pub fn lookup_in<'a>(item: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(direct) = item.get(path) {
        return Some(direct);
    }
    let (head, rest) = path.split_once('.')?;
    lookup(item.get(head)?, rest).found()
}

/// String form of a scalar: strings as-is, numbers and booleans formatted.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Collect every scalar reachable by `path`, fanning out over arrays.
///
/// `fields.targetKey` on `{"fields": [{"targetKey": "a"}, {"targetKey": "b"}]}`
/// yields `["a", "b"]`.
pub fn collect_strings(item: &Map<String, Value>, path: &str) -> Vec<String> {
    fn walk(value: &Value, segments: &[&str], out: &mut Vec<String>) {
        match (value, segments.split_first()) {
            (Value::Array(items), _) => {
                for item in items {
                    walk(item, segments, out);
                }
            }
            (_, None) => out.extend(scalar_string(value).filter(|s| !s.is_empty())),
            (Value::Object(map), Some((head, rest))) => {
                if let Some(next) = map.get(*head) {
                    walk(next, rest, out);
                }
            }
            _ => {}
        }
    }

    if let Some(direct) = item.get(path) {
        let mut out = Vec::new();
        walk(direct, &[], &mut out);
        return out;
    }
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    walk(&Value::Object(item.clone()), &segments, &mut out);
    out
}

/// Set the value at `path`, creating intermediate objects.
///
/// Returns false when an intermediate segment exists but is not an object.
pub fn set(item: &mut Map<String, Value>, path: &str, new_value: Value) -> bool {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return false;
    };

    let mut current = item;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(map) => current = map,
            _ => return false,
        }
    }
    current.insert(last.to_string(), new_value);
    true
}

/// Remove the value at `path`, returning it.
pub fn remove(item: &mut Map<String, Value>, path: &str) -> Option<Value> {
    if let Some(direct) = item.remove(path) {
        return Some(direct);
    }
    let (head, rest) = path.split_once('.')?;
    match item.get_mut(head)? {
        Value::Object(map) => remove(map, rest),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_outcomes() {
        let value = json!({"a": {"b": [10, {"c": "x"}]}, "s": "text"});

        assert_eq!(lookup(&value, "a.b.1.c"), PathLookup::Found(&json!("x")));
        assert_eq!(
            lookup(&value, "a.missing"),
            PathLookup::Missing {
                segment: "missing".into()
            }
        );
        assert_eq!(
            lookup(&value, "s.inner"),
            PathLookup::WrongType {
                segment: "inner".into(),
                found: "string"
            }
        );
    }

    #[test]
    fn test_dotted_key_matches_literally() {
        let value = json!({"ParentFolder.ID": "7", "ParentFolder": {"ID": "8"}});
        assert_eq!(lookup(&value, "ParentFolder.ID").found(), Some(&json!("7")));
    }

    #[test]
    fn test_collect_fans_out_over_arrays() {
        let item = json!({"activities": [{"key": "a"}, {"key": "b"}, {"other": 1}]});
        let item = item.as_object().unwrap();
        assert_eq!(collect_strings(item, "activities.key"), vec!["a", "b"]);
        assert!(collect_strings(item, "nothing").is_empty());
    }

    #[test]
    fn test_set_and_remove() {
        let mut item = Map::new();
        assert!(set(&mut item, "ParentFolder.ID", json!(5)));
        assert_eq!(item["ParentFolder"]["ID"], json!(5));

        assert_eq!(remove(&mut item, "ParentFolder.ID"), Some(json!(5)));
        assert_eq!(item["ParentFolder"], json!({}));

        item.insert("flat".into(), json!("x"));
        assert!(!set(&mut item, "flat.inner", json!(1)));
    }
}
