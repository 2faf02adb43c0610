//! Bidirectional `{{{name}}}` substitution.
//!
//! [`apply_template_values`] turns a template into a deployable definition,
//! [`apply_template_names`] turns literal environment values back into
//! placeholders. Both work on plain text and on every string inside a JSON
//! tree, so metadata carriers and extracted code share one pass.

use std::path::Path;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

const OPEN: &str = "{{{";

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\{([^{}]+)\}\}\}").expect("placeholder pattern is a valid regex")
    })
}

/// Why a substitution failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed placeholder at byte {offset}")]
    Unclosed { offset: usize },

    #[error("invalid substitution pattern: {0}")]
    Pattern(String),
}

/// Placeholder names to literal values, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateMap {
    entries: Vec<(String, String)>,
}

impl TemplateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variable, keeping its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Parse a market definition: a flat JSON object of scalars.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(object) = value else {
            return Err(Error::new(ErrorKind::Config(
                "market definition must be a JSON object".to_string(),
            )));
        };
        let mut map = Self::new();
        for (name, value) in object {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::new(ErrorKind::Config(format!(
                        "market variable {name} must be a scalar, got {other}"
                    ))))
                }
            };
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Load a market definition file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json_str(&text)
    }
}

/// Replace every `{{{name}}}` with its value.
///
/// Unknown names are left as they are. An opening `{{{` without a matching
/// `}}}` is an error.
pub fn apply_template_values(code: &str, map: &TemplateMap) -> std::result::Result<String, TemplateError> {
    if !code.contains(OPEN) {
        return Ok(code.to_string());
    }

    let mut out = String::with_capacity(code.len());
    let mut last = 0;
    for caps in placeholder_pattern().captures_iter(code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let gap = &code[last..whole.start()];
        if let Some(pos) = gap.find(OPEN) {
            return Err(TemplateError::Unclosed { offset: last + pos });
        }
        out.push_str(gap);
        match map.get(name.as_str()) {
            Some(value) => out.push_str(value),
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    let tail = &code[last..];
    if let Some(pos) = tail.find(OPEN) {
        return Err(TemplateError::Unclosed { offset: last + pos });
    }
    out.push_str(tail);
    Ok(out)
}

/// Build the alternation matching every literal value, longest first.
///
/// When several names share a value the first declared name is kept.
fn names_pattern(map: &TemplateMap) -> std::result::Result<Option<(Regex, Vec<(String, String)>)>, TemplateError> {
    let mut by_value: Vec<(String, String)> = Vec::new();
    for (name, value) in map.iter() {
        if value.is_empty() || by_value.iter().any(|(v, _)| v == value) {
            continue;
        }
        by_value.push((value.to_string(), name.to_string()));
    }
    if by_value.is_empty() {
        return Ok(None);
    }
    // Stable sort keeps declaration order among equal lengths.
    by_value.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let alternation = by_value
        .iter()
        .map(|(value, _)| regex_lite::escape(value))
        .collect::<Vec<_>>()
        .join("|");
    let regex = Regex::new(&alternation).map_err(|e| TemplateError::Pattern(e.to_string()))?;
    Ok(Some((regex, by_value)))
}

fn replace_names(code: &str, regex: &Regex, by_value: &[(String, String)]) -> String {
    regex
        .replace_all(code, |caps: &regex_lite::Captures<'_>| {
            let matched = &caps[0];
            by_value
                .iter()
                .find(|(value, _)| value == matched)
                .map(|(_, name)| format!("{{{{{{{name}}}}}}}"))
                .unwrap_or_else(|| matched.to_string())
        })
        .into_owned()
}

/// Replace literal values with `{{{name}}}` placeholders in one pass.
pub fn apply_template_names(code: &str, map: &TemplateMap) -> std::result::Result<String, TemplateError> {
    Ok(match names_pattern(map)? {
        Some((regex, by_value)) => replace_names(code, &regex, &by_value),
        None => code.to_string(),
    })
}

/// [`apply_template_values`] over every string in a JSON tree, keys included.
pub fn apply_values_to_json(value: &Value, map: &TemplateMap) -> std::result::Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => Value::String(apply_template_values(s, map)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| apply_values_to_json(v, map))
                .collect::<std::result::Result<_, _>>()?,
        ),
        Value::Object(object) => {
            let mut out = serde_json::Map::with_capacity(object.len());
            for (k, v) in object {
                out.insert(apply_template_values(k, map)?, apply_values_to_json(v, map)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

/// [`apply_template_names`] over every string in a JSON tree, keys included.
pub fn apply_names_to_json(value: &Value, map: &TemplateMap) -> std::result::Result<Value, TemplateError> {
    let Some((regex, by_value)) = names_pattern(map)? else {
        return Ok(value.clone());
    };

    fn walk(value: &Value, regex: &Regex, by_value: &[(String, String)]) -> Value {
        match value {
            Value::String(s) => Value::String(replace_names(s, regex, by_value)),
            Value::Array(items) => Value::Array(items.iter().map(|v| walk(v, regex, by_value)).collect()),
            Value::Object(object) => Value::Object(
                object
                    .iter()
                    .map(|(k, v)| (replace_names(k, regex, by_value), walk(v, regex, by_value)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
    Ok(walk(value, &regex, &by_value))
}

/// Qualify a substitution failure with the type and file it happened in.
pub fn template_error(metadata_type: &str, file: impl AsRef<Path>, err: TemplateError) -> Error {
    Error::with_source(
        ErrorKind::Template {
            metadata_type: metadata_type.to_string(),
            file: file.as_ref().display().to_string(),
            message: err.to_string(),
        },
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn market() -> TemplateMap {
        TemplateMap::new()
            .with("bu", "Production")
            .with("prefix", "PRD")
            .with("mid", "510001234")
    }

    #[test]
    fn test_values_replace_known_and_keep_unknown() {
        let out = apply_template_values(
            "SELECT * FROM {{{prefix}}}_Subscribers /* {{{unknown}}} */",
            &market(),
        )
        .unwrap();
        assert_eq!(out, "SELECT * FROM PRD_Subscribers /* {{{unknown}}} */");
    }

    #[test]
    fn test_values_pass_through_without_map() {
        let code = "nothing {{{x}}} here";
        assert_eq!(apply_template_values(code, &TemplateMap::new()).unwrap(), code);
    }

    #[test]
    fn test_unclosed_placeholder_is_an_error() {
        assert_eq!(
            apply_template_values("ok {{{prefix}}} then {{{broken", &market()),
            Err(TemplateError::Unclosed { offset: 21 })
        );
    }

    #[test]
    fn test_names_prefer_longest_value() {
        let map = TemplateMap::new().with("short", "PRD").with("long", "PRD_Main");
        assert_eq!(
            apply_template_names("PRD_Main and PRD", &map).unwrap(),
            "{{{long}}} and {{{short}}}"
        );
    }

    #[test]
    fn test_names_first_declared_wins_on_shared_value() {
        let map = TemplateMap::new().with("first", "X1").with("second", "X1");
        assert_eq!(apply_template_names("id X1", &map).unwrap(), "id {{{first}}}");
    }

    #[test]
    fn test_names_do_not_rescan_inserted_placeholders() {
        let map = TemplateMap::new().with("a", "b").with("b", "{{{a}}}");
        assert_eq!(apply_template_names("b", &map).unwrap(), "{{{a}}}");
    }

    #[test]
    fn test_round_trip() {
        let map = market();
        let code = "Deploy {{{prefix}}}_Query to {{{bu}}} ({{{mid}}})";
        let values = apply_template_values(code, &map).unwrap();
        assert_eq!(values, "Deploy PRD_Query to Production (510001234)");
        assert_eq!(apply_template_names(&values, &map).unwrap(), code);
    }

    #[test]
    fn test_json_round_trip_includes_keys() {
        let map = market();
        let template = json!({
            "key": "{{{prefix}}}_Query",
            "nested": [{"{{{bu}}}": "{{{mid}}}"}, 5, null]
        });
        let definition = apply_values_to_json(&template, &map).unwrap();
        assert_eq!(definition["key"], "PRD_Query");
        assert_eq!(definition["nested"][0]["Production"], "510001234");
        assert_eq!(apply_names_to_json(&definition, &map).unwrap(), template);
    }

    #[test]
    fn test_market_keeps_declaration_order() {
        let map = TemplateMap::from_json_str(r#"{"zeta": "1", "alpha": 2, "mid": true}"#).unwrap();
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
        assert_eq!(map.get("alpha"), Some("2"));

        assert!(TemplateMap::from_json_str("[1]").is_err());
        assert!(TemplateMap::from_json_str(r#"{"x": {}}"#).is_err());
    }

    #[test]
    fn test_template_error_names_type_and_file() {
        let err = template_error("query", "template/query/q.query-meta.sql", TemplateError::Unclosed { offset: 3 });
        assert_eq!(
            err.to_string(),
            "Template error in query file template/query/q.query-meta.sql: unclosed placeholder at byte 3"
        );
    }
}
