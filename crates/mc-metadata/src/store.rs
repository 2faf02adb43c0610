//! Local file trees.
//!
//! ```text
//! retrieve/<credential>/<bu>/<type>/<key>.<type>-meta.json   (+ code, + -doc.md)
//! deploy/<credential>/<bu>/<type>/<key>.<type>-meta.json
//! template/<type>/<key>.<type>-meta.json
//! ```
//!
//! Some types keep each item in its own folder,
//! `<type>/<key>/<key>.<type>-meta.json`. Reads fall back to that nested
//! layout when asked to.
//!
//! Keys come from the server and become file names, so a key that is
//! empty, `.`, `..` or contains a path separator is refused.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use mcsync_auth::BusinessUnit;
use tracing::debug;

use crate::code::{base_name, CodeFile, Extracted};
use crate::definition::TypeDefinition;
use crate::error::{Error, ErrorKind, Result};
use crate::item::MetadataItem;

/// Which tree to read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tree {
    Retrieve,
    Deploy,
    Template,
}

/// An item as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub json: MetadataItem,
    pub code: Vec<CodeFile>,
    /// The JSON file the item was read from.
    pub path: PathBuf,
}

/// File store rooted at the three tree directories.
#[derive(Debug, Clone)]
pub struct FileStore {
    retrieve_root: PathBuf,
    deploy_root: PathBuf,
    template_root: PathBuf,
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether `key` can be used as a single path segment.
fn is_safe_key(key: &str) -> bool {
    !(key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']))
}

fn check_key(metadata_type: &str, key: &str) -> Result<()> {
    if is_safe_key(key) {
        Ok(())
    } else {
        Err(Error::invalid_item(metadata_type, key, "key cannot be used as a file name"))
    }
}

impl FileStore {
    pub fn new(
        retrieve_root: impl Into<PathBuf>,
        deploy_root: impl Into<PathBuf>,
        template_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            retrieve_root: retrieve_root.into(),
            deploy_root: deploy_root.into(),
            template_root: template_root.into(),
        }
    }

    /// Directory holding all items of `metadata_type` in `tree`.
    pub fn type_dir(&self, tree: Tree, bu: &BusinessUnit, metadata_type: &str) -> PathBuf {
        match tree {
            Tree::Retrieve => self
                .retrieve_root
                .join(&bu.credential)
                .join(&bu.name)
                .join(metadata_type),
            Tree::Deploy => self
                .deploy_root
                .join(&bu.credential)
                .join(&bu.name)
                .join(metadata_type),
            Tree::Template => self.template_root.join(metadata_type),
        }
    }

    /// Primary location of an item's JSON file.
    pub fn meta_path(&self, tree: Tree, bu: &BusinessUnit, metadata_type: &str, key: &str) -> PathBuf {
        self.type_dir(tree, bu, metadata_type)
            .join(format!("{}.json", base_name(metadata_type, key)))
    }

    /// Write an item's JSON carrier, its code files and optional doc page.
    pub async fn write_item(
        &self,
        tree: Tree,
        bu: &BusinessUnit,
        metadata_type: &str,
        key: &str,
        extracted: &Extracted,
        doc: Option<&str>,
    ) -> Result<PathBuf> {
        check_key(metadata_type, key)?;
        let dir = self.type_dir(tree, bu, metadata_type);
        tokio::fs::create_dir_all(&dir).await?;

        let json_path = dir.join(format!("{}.json", base_name(metadata_type, key)));
        let mut text = serde_json::to_string_pretty(&extracted.json)?;
        text.push('\n');
        tokio::fs::write(&json_path, text).await?;

        for file in &extracted.code {
            let path = dir.join(file.relative_path());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &file.content).await?;
        }
        if let Some(doc) = doc {
            tokio::fs::write(dir.join(format!("{key}.{metadata_type}-doc.md")), doc).await?;
        }

        debug!(path = %json_path.display(), "Item written");
        Ok(json_path)
    }

    /// Read an item and its code files.
    ///
    /// With `nested`, an item missing from the type directory is looked up
    /// in `<type>/<key>/`, and code files missing next to the JSON are
    /// looked up there as well.
    pub async fn read_item(
        &self,
        tree: Tree,
        bu: &BusinessUnit,
        def: &TypeDefinition,
        key: &str,
        nested: bool,
    ) -> Result<Option<StoredItem>> {
        check_key(&def.type_name, key)?;
        let type_dir = self.type_dir(tree, bu, &def.type_name);
        let file_name = format!("{}.json", base_name(&def.type_name, key));
        let nested_dir = type_dir.join(key);

        let mut candidates = vec![type_dir.clone()];
        if nested {
            candidates.push(nested_dir.clone());
        }

        for dir in candidates {
            let path = dir.join(&file_name);
            let Some(text) = read_optional(&path).await? else {
                continue;
            };
            let json: MetadataItem = serde_json::from_str(&text).map_err(|e| {
                Error::with_source(
                    ErrorKind::Json(format!("{}: {e}", path.display())),
                    e,
                )
            })?;

            let mut code_dirs = vec![dir.clone()];
            if nested && dir != nested_dir {
                code_dirs.push(nested_dir.clone());
            }
            let code = self.read_code(&code_dirs, def, key).await?;
            return Ok(Some(StoredItem { json, code, path }));
        }
        Ok(None)
    }

    async fn read_code(&self, dirs: &[PathBuf], def: &TypeDefinition, key: &str) -> Result<Vec<CodeFile>> {
        let base = base_name(&def.type_name, key);
        let mut files = Vec::new();
        for field in &def.code_fields {
            'field: for dir in dirs {
                for ext in &field.extensions {
                    if let Some(content) = read_optional(&dir.join(format!("{base}.{ext}"))).await? {
                        files.push(CodeFile::sibling(&def.type_name, key, ext.clone(), content));
                        break 'field;
                    }
                }
            }
        }
        Ok(files)
    }

    /// Keys of every item of `metadata_type` in `tree`, sorted.
    pub async fn list_keys(&self, tree: Tree, bu: &BusinessUnit, metadata_type: &str) -> Result<Vec<String>> {
        let dir = self.type_dir(tree, bu, metadata_type);
        let suffix = format!(".{metadata_type}-meta.json");
        let mut keys = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(key) = name.strip_suffix(&suffix) {
                keys.push(key.to_string());
            } else if entry.file_type().await?.is_dir() {
                let nested = entry.path().join(format!("{name}{suffix}"));
                if tokio::fs::try_exists(&nested).await? {
                    keys.push(name);
                }
            }
        }
        keys.retain(|key| is_safe_key(key));
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Delete every local file of an item. Returns the number removed.
    pub async fn remove_item(
        &self,
        tree: Tree,
        bu: &BusinessUnit,
        def: &TypeDefinition,
        key: &str,
    ) -> Result<usize> {
        check_key(&def.type_name, key)?;
        let type_dir = self.type_dir(tree, bu, &def.type_name);
        let base = base_name(&def.type_name, key);
        let mut names = vec![format!("{base}.json"), format!("{key}.{}-doc.md", def.type_name)];
        for field in &def.code_fields {
            names.extend(field.extensions.iter().map(|ext| format!("{base}.{ext}")));
        }

        let mut removed = 0;
        for dir in [type_dir.clone(), type_dir.join(key)] {
            for name in &names {
                if remove_optional(&dir.join(name)).await? {
                    removed += 1;
                }
            }
        }
        // Only drops the nested folder once it is empty.
        let _ = tokio::fs::remove_dir(type_dir.join(key)).await;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code;
    use crate::definition::{ApiKind, FieldSpec};
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FileStore {
        FileStore::new(
            dir.path().join("retrieve"),
            dir.path().join("deploy"),
            dir.path().join("template"),
        )
    }

    fn bu() -> BusinessUnit {
        BusinessUnit::new("cred", "Child", "200", "100")
    }

    fn query_def() -> TypeDefinition {
        TypeDefinition::builder("query", ApiKind::Rest, "key")
            .field("queryText", FieldSpec::all())
            .code_field("queryText", &["sql"])
            .build()
    }

    #[tokio::test]
    async fn test_write_then_read_with_code() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let def = query_def();
        let item = json!({"key": "q1", "queryText": "SELECT 1"});
        let extracted = code::extract(&def, item.as_object().unwrap()).unwrap();

        let path = store
            .write_item(Tree::Retrieve, &bu(), "query", "q1", &extracted, Some("# q1"))
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("retrieve/cred/Child/query/q1.query-meta.json"));
        assert!(dir.path().join("retrieve/cred/Child/query/q1.query-meta.sql").exists());
        assert!(dir.path().join("retrieve/cred/Child/query/q1.query-doc.md").exists());

        let stored = store
            .read_item(Tree::Retrieve, &bu(), &def, "q1", false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.json, extracted.json);
        assert_eq!(stored.code, extracted.code);

        assert_eq!(store.list_keys(Tree::Retrieve, &bu(), "query").await.unwrap(), vec!["q1"]);
    }

    #[tokio::test]
    async fn test_nested_layout_is_read_on_request() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let def = query_def();
        let nested = dir.path().join("template/query/q2");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("q2.query-meta.json"), r#"{"key": "q2"}"#).unwrap();
        std::fs::write(nested.join("q2.query-meta.sql"), "SELECT 2").unwrap();

        assert!(store
            .read_item(Tree::Template, &bu(), &def, "q2", false)
            .await
            .unwrap()
            .is_none());

        let stored = store
            .read_item(Tree::Template, &bu(), &def, "q2", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.code[0].content, "SELECT 2");
        assert_eq!(store.list_keys(Tree::Template, &bu(), "query").await.unwrap(), vec!["q2"]);
    }

    #[tokio::test]
    async fn test_keys_that_leave_the_type_dir_are_refused() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let def = query_def();
        let extracted = code::extract(&def, json!({"key": "x"}).as_object().unwrap()).unwrap();

        for key in ["../escaped", "a/b", "..", ""] {
            let err = store
                .write_item(Tree::Retrieve, &bu(), "query", key, &extracted, None)
                .await
                .unwrap_err();
            assert!(matches!(err.kind, ErrorKind::InvalidItem { .. }), "{key}");
            assert!(store.read_item(Tree::Retrieve, &bu(), &def, key, true).await.is_err());
            assert!(store.remove_item(Tree::Retrieve, &bu(), &def, key).await.is_err());
        }
        assert!(!dir.path().join("retrieve/cred/Child/escaped.query-meta.json").exists());

        let type_dir = dir.path().join("deploy/cred/Child/query");
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(type_dir.join(r"a\b.query-meta.json"), "{}").unwrap();
        std::fs::write(type_dir.join("ok.query-meta.json"), "{}").unwrap();
        assert_eq!(store.list_keys(Tree::Deploy, &bu(), "query").await.unwrap(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_remove_item_and_missing_dirs() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let def = query_def();
        assert!(store.list_keys(Tree::Deploy, &bu(), "query").await.unwrap().is_empty());

        let item = json!({"key": "q1", "queryText": "SELECT 1"});
        let extracted = code::extract(&def, item.as_object().unwrap()).unwrap();
        store
            .write_item(Tree::Retrieve, &bu(), "query", "q1", &extracted, None)
            .await
            .unwrap();

        assert_eq!(store.remove_item(Tree::Retrieve, &bu(), &def, "q1").await.unwrap(), 2);
        assert!(store
            .read_item(Tree::Retrieve, &bu(), &def, "q1", true)
            .await
            .unwrap()
            .is_none());
    }
}
