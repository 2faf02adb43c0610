//! Splitting embedded source code out of items and back.
//!
//! A type declares its code fields in its definition. [`extract`] moves each
//! field's text into a [`CodeFile`] and leaves the rest of the item as the
//! JSON carrier; [`merge`] reverses it and fails when a declared file is
//! missing, since an item cannot be deployed without its source.

use std::path::PathBuf;

use tracing::warn;

use crate::definition::TypeDefinition;
use crate::error::{Error, ErrorKind, Result};
use crate::item::{field_string, MetadataItem};

/// One auxiliary code file belonging to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFile {
    /// Directory segments below the type directory; empty for siblings.
    pub sub_folder: Vec<String>,
    /// File name without extension, `<key>.<type>-meta`.
    pub file_name: String,
    /// Extension without the dot.
    pub file_ext: String,
    pub content: String,
}

impl CodeFile {
    /// A sibling file for `key` of `metadata_type`.
    pub fn sibling(
        metadata_type: &str,
        key: &str,
        file_ext: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sub_folder: Vec::new(),
            file_name: base_name(metadata_type, key),
            file_ext: file_ext.into(),
            content: content.into(),
        }
    }

    /// Path relative to the type directory.
    pub fn relative_path(&self) -> PathBuf {
        let mut path: PathBuf = self.sub_folder.iter().collect();
        path.push(format!("{}.{}", self.file_name, self.file_ext));
        path
    }
}

/// Base file name shared by an item's JSON and code files.
pub fn base_name(metadata_type: &str, key: &str) -> String {
    format!("{key}.{metadata_type}-meta")
}

/// JSON carrier plus the code pulled out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub json: MetadataItem,
    pub code: Vec<CodeFile>,
}

fn item_key(def: &TypeDefinition, item: &MetadataItem) -> Result<String> {
    field_string(item, &def.key_field).ok_or_else(|| {
        Error::invalid_item(&def.type_name, "?", format!("missing key field {}", def.key_field))
    })
}

/// Split every declared code field into its default-extension file.
pub fn extract(def: &TypeDefinition, item: &MetadataItem) -> Result<Extracted> {
    let mut json = item.clone();
    if def.code_fields.is_empty() {
        return Ok(Extracted { json, code: Vec::new() });
    }

    let key = item_key(def, item)?;
    let mut code = Vec::new();
    for field in &def.code_fields {
        // Non-string values stay in the JSON.
        let content = match json.get(&field.field) {
            Some(serde_json::Value::String(content)) => content.clone(),
            _ => continue,
        };
        json.remove(&field.field);
        let ext = field.extensions.first().map(String::as_str).unwrap_or("txt");
        code.push(CodeFile::sibling(&def.type_name, &key, ext, content));
    }
    Ok(Extracted { json, code })
}

/// Put the code files back into their fields. A field without a file is
/// an error unless the JSON still carries it.
pub fn merge(def: &TypeDefinition, json: &MetadataItem, files: &[CodeFile]) -> Result<MetadataItem> {
    let mut item = json.clone();
    if def.code_fields.is_empty() {
        return Ok(item);
    }

    let key = item_key(def, json)?;
    for field in &def.code_fields {
        let file = files
            .iter()
            .find(|f| field.extensions.iter().any(|ext| *ext == f.file_ext));
        match file {
            Some(file) => {
                item.insert(field.field.clone(), file.content.clone().into());
            }
            None if item.contains_key(&field.field) => {}
            None => return Err(missing_file(def, &key, field.extensions.first())),
        }
    }
    Ok(item)
}

pub(crate) fn missing_file(def: &TypeDefinition, key: &str, ext: Option<&String>) -> Error {
    Error::new(ErrorKind::MissingFile {
        path: format!(
            "{}/{}.{}",
            def.type_name,
            base_name(&def.type_name, key),
            ext.map(String::as_str).unwrap_or("*")
        ),
    })
}

const SSJS_OPEN: &str = r#"<script runat="server">"#;
const SSJS_CLOSE: &str = "</script>";

/// The body of a script that is exactly one server-side script block.
pub fn ssjs_body(content: &str) -> Option<&str> {
    let inner = content.strip_prefix(SSJS_OPEN)?.strip_suffix(SSJS_CLOSE)?;
    (!inner.contains("<script")).then_some(inner)
}

/// Wrap a script body back into its server-side script block.
pub fn wrap_ssjs(body: &str) -> String {
    format!("{SSJS_OPEN}{body}{SSJS_CLOSE}")
}

/// Rough check whether content carries markup besides script blocks.
///
/// Advisory only: a hit logs a warning and never fails.
pub fn looks_like_html(metadata_type: &str, key: &str, content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    let markup = ["<html", "<body", "<div", "<table", "<p>", "<span", "<!doctype"]
        .iter()
        .any(|tag| lower.contains(tag));
    if markup {
        warn!(
            metadata_type,
            key, "Content looks like HTML, stored as .html and not as plain script"
        );
    }
    markup
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ApiKind, FieldSpec};
    use serde_json::json;

    fn query_def() -> TypeDefinition {
        TypeDefinition::builder("query", ApiKind::Rest, "key")
            .field("queryText", FieldSpec::all())
            .code_field("queryText", &["sql"])
            .build()
    }

    fn item(value: serde_json::Value) -> MetadataItem {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_extract_moves_code_out() {
        let extracted = extract(
            &query_def(),
            &item(json!({"key": "q1", "name": "Q", "queryText": "SELECT 1"})),
        )
        .unwrap();

        assert!(!extracted.json.contains_key("queryText"));
        assert_eq!(extracted.code.len(), 1);
        assert_eq!(extracted.code[0].relative_path(), PathBuf::from("q1.query-meta.sql"));
        assert_eq!(extracted.code[0].content, "SELECT 1");
    }

    #[test]
    fn test_round_trip() {
        let def = query_def();
        let original = item(json!({"key": "q1", "queryText": "SELECT\n  Email\nFROM x"}));
        let extracted = extract(&def, &original).unwrap();
        assert_eq!(merge(&def, &extracted.json, &extracted.code).unwrap(), original);
    }

    #[test]
    fn test_non_string_code_field_stays_in_json() {
        let def = query_def();
        let original = item(json!({"key": "q1", "queryText": null}));
        let extracted = extract(&def, &original).unwrap();

        assert_eq!(extracted.json["queryText"], serde_json::Value::Null);
        assert!(extracted.code.is_empty());
        assert_eq!(merge(&def, &extracted.json, &extracted.code).unwrap(), original);
    }

    #[test]
    fn test_merge_without_file_fails() {
        let err = merge(&query_def(), &item(json!({"key": "q1"})), &[]).unwrap_err();
        match err.kind {
            ErrorKind::MissingFile { path } => assert_eq!(path, "query/q1.query-meta.sql"),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn test_types_without_code_pass_through() {
        let def = TypeDefinition::builder("folder", ApiKind::Soap, "CustomerKey").build();
        let original = item(json!({"Name": "no key needed"}));
        let extracted = extract(&def, &original).unwrap();
        assert_eq!(extracted.json, original);
        assert!(extracted.code.is_empty());
    }

    #[test]
    fn test_ssjs_block_detection() {
        let script = r#"<script runat="server">Platform.Load("core", "1");</script>"#;
        assert_eq!(ssjs_body(script), Some(r#"Platform.Load("core", "1");"#));
        assert_eq!(wrap_ssjs(ssjs_body(script).unwrap()), script);

        let mixed = r#"<script runat="server">a</script><div></div><script>b</script>"#;
        assert_eq!(ssjs_body(mixed), None);
        assert!(looks_like_html("script", "s1", mixed));
        assert!(!looks_like_html("script", "s1", "var x = 1;"));
    }
}
