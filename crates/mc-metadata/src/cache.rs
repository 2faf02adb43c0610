//! Per-business-unit store of fetched metadata used for reference resolution.
//!
//! The cache is rebuilt every run. Each business unit is a separate scope
//! keyed by its MID; callers always name the scope they read from, so a
//! lookup never crosses scopes unless asked to.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use mcsync_auth::BusinessUnit;
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};
use crate::item::{MetadataItem, MetadataTypeMap};
use crate::path::{self, PathLookup};

/// Type name of cached folders.
pub const FOLDER_TYPE: &str = "folder";
/// Field of a cached folder holding its full path.
pub const FOLDER_PATH_FIELD: &str = "Path";
/// Field of a cached folder holding its id.
pub const FOLDER_ID_FIELD: &str = "ID";
/// Type name of cached subscriber lists.
pub const LIST_TYPE: &str = "list";

/// Why a cache lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("No cache initialized for business unit {scope}")]
    NoScope { scope: String },

    #[error("No {metadata_type} items cached")]
    TypeNotCached { metadata_type: String },

    #[error("No {metadata_type} found with {field} = {value}")]
    ItemNotFound {
        metadata_type: String,
        field: String,
        value: String,
    },

    #[error("{metadata_type} {key} has no field {field}")]
    FieldMissing {
        metadata_type: String,
        key: String,
        field: String,
    },

    #[error("{metadata_type} {value} is ambiguous, candidates: {}", .candidates.join(", "))]
    Ambiguous {
        metadata_type: String,
        value: String,
        candidates: Vec<String>,
    },
}

type ScopeStore = HashMap<String, MetadataTypeMap>;

/// Metadata cache.
#[derive(Debug, Default)]
pub struct MetadataCache {
    scopes: RwLock<HashMap<String, ScopeStore>>,
}

fn values_match(value: &Value, expected: &str) -> bool {
    path::scalar_string(value).is_some_and(|s| s == expected)
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ScopeStore>> {
        self.scopes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ScopeStore>> {
        self.scopes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the scope of `bu` and make sure its parent scope exists.
    pub fn init(&self, bu: &BusinessUnit) -> Result<()> {
        if bu.mid.trim().is_empty() {
            return Err(Error::new(ErrorKind::Config(format!(
                "business unit {} has no MID",
                bu.name
            ))));
        }
        let mut scopes = self.write();
        scopes.insert(bu.mid.clone(), ScopeStore::new());
        if !bu.parent_mid.is_empty() {
            scopes.entry(bu.parent_mid.clone()).or_default();
        }
        Ok(())
    }

    /// Whether the scope has anything cached for `metadata_type`.
    pub fn has_type(&self, scope: &str, metadata_type: &str) -> bool {
        self.read()
            .get(scope)
            .is_some_and(|s| s.contains_key(metadata_type))
    }

    /// Replace everything known about `metadata_type` in `scope`.
    pub fn set_metadata(&self, scope: &str, metadata_type: &str, items: MetadataTypeMap) {
        self.write()
            .entry(scope.to_string())
            .or_default()
            .insert(metadata_type.to_string(), items);
    }

    /// Merge items into `scope`; each key is overwritten as a whole.
    pub fn merge_metadata(&self, scope: &str, metadata_type: &str, items: MetadataTypeMap) {
        self.write()
            .entry(scope.to_string())
            .or_default()
            .entry(metadata_type.to_string())
            .or_default()
            .extend(items);
    }

    /// Snapshot of a cached type.
    pub fn get_type(&self, scope: &str, metadata_type: &str) -> Option<MetadataTypeMap> {
        self.read().get(scope)?.get(metadata_type).cloned()
    }

    /// Snapshot of a cached item.
    pub fn get_item(&self, scope: &str, metadata_type: &str, key: &str) -> Option<MetadataItem> {
        self.read().get(scope)?.get(metadata_type)?.get(key).cloned()
    }

    /// Find the item of `metadata_type` whose `search_field` equals
    /// `search_value` and return its `return_field`.
    ///
    /// Both fields accept dot paths.
    pub fn search_for_field(
        &self,
        scope: &str,
        metadata_type: &str,
        search_value: &str,
        search_field: &str,
        return_field: &str,
    ) -> std::result::Result<Value, LookupError> {
        let scopes = self.read();
        let store = scopes.get(scope).ok_or_else(|| LookupError::NoScope {
            scope: scope.to_string(),
        })?;
        let items = store
            .get(metadata_type)
            .ok_or_else(|| LookupError::TypeNotCached {
                metadata_type: metadata_type.to_string(),
            })?;

        let (key, item) = items
            .iter()
            .find(|(_, item)| {
                path::lookup_in(item, search_field).is_some_and(|v| values_match(v, search_value))
            })
            .ok_or_else(|| LookupError::ItemNotFound {
                metadata_type: metadata_type.to_string(),
                field: search_field.to_string(),
                value: search_value.to_string(),
            })?;

        match path::lookup(&Value::Object(item.clone()), return_field) {
            PathLookup::Found(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(LookupError::FieldMissing {
                metadata_type: metadata_type.to_string(),
                key: key.clone(),
                field: return_field.to_string(),
            }),
        }
    }

    /// String form of [`search_for_field`](Self::search_for_field).
    pub fn search_for_string(
        &self,
        scope: &str,
        metadata_type: &str,
        search_value: &str,
        search_field: &str,
        return_field: &str,
    ) -> std::result::Result<String, LookupError> {
        let value =
            self.search_for_field(scope, metadata_type, search_value, search_field, return_field)?;
        path::scalar_string(&value).ok_or_else(|| LookupError::FieldMissing {
            metadata_type: metadata_type.to_string(),
            key: search_value.to_string(),
            field: return_field.to_string(),
        })
    }

    /// Resolve a folder path to its id.
    ///
    /// A folder cached in `scope` wins. Otherwise a single match from any
    /// other scope is used (shared folders of the parent business unit);
    /// several distinct matches are reported as ambiguous.
    pub fn get_folder_id(&self, scope: &str, folder_path: &str) -> std::result::Result<i64, LookupError> {
        let scopes = self.read();
        let mut any_cached = false;
        let mut exact = None;
        let mut foreign: Vec<i64> = Vec::new();

        for (scope_id, store) in scopes.iter() {
            let Some(folders) = store.get(FOLDER_TYPE) else {
                continue;
            };
            any_cached = true;
            for folder in folders.values() {
                let path_matches = folder
                    .get(FOLDER_PATH_FIELD)
                    .is_some_and(|p| values_match(p, folder_path));
                if !path_matches {
                    continue;
                }
                let Some(id) = folder
                    .get(FOLDER_ID_FIELD)
                    .and_then(path::scalar_string)
                    .and_then(|s| s.parse::<i64>().ok())
                else {
                    continue;
                };
                if scope_id == scope {
                    exact = Some(id);
                } else if !foreign.contains(&id) {
                    foreign.push(id);
                }
            }
        }

        if !any_cached {
            return Err(LookupError::TypeNotCached {
                metadata_type: FOLDER_TYPE.to_string(),
            });
        }
        if let Some(id) = exact {
            return Ok(id);
        }
        match foreign.as_slice() {
            [] => Err(LookupError::ItemNotFound {
                metadata_type: FOLDER_TYPE.to_string(),
                field: FOLDER_PATH_FIELD.to_string(),
                value: folder_path.to_string(),
            }),
            [id] => Ok(*id),
            many => {
                let mut candidates: Vec<String> = many.iter().map(|id| id.to_string()).collect();
                candidates.sort();
                Err(LookupError::Ambiguous {
                    metadata_type: FOLDER_TYPE.to_string(),
                    value: folder_path.to_string(),
                    candidates,
                })
            }
        }
    }

    /// Resolve a folder id to its path.
    pub fn get_folder_path(&self, scope: &str, folder_id: &str) -> std::result::Result<String, LookupError> {
        self.search_for_string(scope, FOLDER_TYPE, folder_id, FOLDER_ID_FIELD, FOLDER_PATH_FIELD)
    }

    /// Compound `folderPath/listName` identity of a list, from its object id.
    pub fn get_list_path_name(
        &self,
        scope: &str,
        object_id: &str,
    ) -> std::result::Result<String, LookupError> {
        let list_name = self.search_for_string(scope, LIST_TYPE, object_id, "ObjectID", "ListName")?;
        let category = self.search_for_string(scope, LIST_TYPE, object_id, "ObjectID", "Category")?;
        let folder_path = self.get_folder_path(scope, &category)?;
        Ok(format!("{folder_path}/{list_name}"))
    }

    /// Object id of the list identified by `folderPath/listName`.
    pub fn get_list_object_id(
        &self,
        scope: &str,
        path_name: &str,
    ) -> std::result::Result<String, LookupError> {
        let not_found = || LookupError::ItemNotFound {
            metadata_type: LIST_TYPE.to_string(),
            field: "path/name".to_string(),
            value: path_name.to_string(),
        };
        let (folder_path, list_name) = path_name.rsplit_once('/').ok_or_else(not_found)?;
        let folder_id = self.get_folder_id(scope, folder_path)?.to_string();

        let scopes = self.read();
        let lists = scopes
            .get(scope)
            .and_then(|s| s.get(LIST_TYPE))
            .ok_or_else(|| LookupError::TypeNotCached {
                metadata_type: LIST_TYPE.to_string(),
            })?;
        let (key, list) = lists
            .iter()
            .find(|(_, list)| {
                list.get("ListName").is_some_and(|n| values_match(n, list_name))
                    && list.get("Category").is_some_and(|c| values_match(c, &folder_id))
            })
            .ok_or_else(not_found)?;
        list.get("ObjectID")
            .and_then(path::scalar_string)
            .ok_or_else(|| LookupError::FieldMissing {
                metadata_type: LIST_TYPE.to_string(),
                key: key.clone(),
                field: "ObjectID".to_string(),
            })
    }
}
