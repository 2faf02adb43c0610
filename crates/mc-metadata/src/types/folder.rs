//! Folders (`DataFolder`).
//!
//! Folders are identified across business units by their path, which the
//! API does not return: it is rebuilt on retrieve from the parent chain and
//! resolved back to a parent id on deploy. A folder can only be created
//! once its parent exists, so creates run one at a time, parents first.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::cache::{FOLDER_ID_FIELD, FOLDER_PATH_FIELD, FOLDER_TYPE};
use crate::config::SyncContext;
use crate::definition::{ApiKind, FieldSpec, PayloadFor, TypeDefinition};
use crate::error::Result;
use crate::item::{field_string, MetadataItem, MetadataTypeMap};
use crate::metadata_type::MetadataType;
use crate::path;
use crate::soap;

const PARENT_ID_PATH: &str = "ParentFolder.ID";

/// The folder adapter.
#[derive(Debug, Clone)]
pub struct Folder {
    def: TypeDefinition,
}

impl Default for Folder {
    fn default() -> Self {
        Self::new()
    }
}

impl Folder {
    pub fn new() -> Self {
        let def = TypeDefinition::builder(FOLDER_TYPE, ApiKind::Soap, "CustomerKey")
            .id_field(FOLDER_ID_FIELD)
            .name_field("Name")
            .soap_object("DataFolder")
            .field(FOLDER_ID_FIELD, FieldSpec::read_only())
            .field("CustomerKey", FieldSpec::all())
            .field("Name", FieldSpec::all())
            .field("Description", FieldSpec::all())
            .field("ContentType", FieldSpec::create_only())
            .field("AllowChildren", FieldSpec::create_only())
            .field("IsActive", FieldSpec::all())
            .field("IsEditable", FieldSpec::all())
            .field(PARENT_ID_PATH, FieldSpec::reference())
            .field(FOLDER_PATH_FIELD, FieldSpec::local())
            .depends_on_field(FOLDER_TYPE, FOLDER_PATH_FIELD, FOLDER_PATH_FIELD)
            .build();
        Self { def }
    }
}

/// Parent path of a folder path, `None` for a root folder.
fn parent_path(folder_path: &str) -> Option<&str> {
    folder_path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Fill in `Path` for every folder from its name and parent chain.
///
/// A chain that loops or leads to an unknown parent ends where it breaks.
fn build_paths(items: &mut MetadataTypeMap) {
    let by_id: HashMap<String, (String, Option<String>)> = items
        .values()
        .filter_map(|folder| {
            let id = field_string(folder, FOLDER_ID_FIELD)?;
            let name = field_string(folder, "Name").unwrap_or_default();
            let parent = path::lookup_in(folder, PARENT_ID_PATH)
                .and_then(path::scalar_string)
                .filter(|p| !p.is_empty() && p != "0");
            Some((id, (name, parent)))
        })
        .collect();

    for folder in items.values_mut() {
        let Some(mut current) = field_string(folder, FOLDER_ID_FIELD) else {
            continue;
        };
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        while seen.insert(current.clone()) {
            let Some((name, parent)) = by_id.get(&current) else {
                break;
            };
            segments.push(name.clone());
            match parent {
                Some(parent) => current = parent.clone(),
                None => break,
            }
        }
        segments.reverse();
        folder.insert(FOLDER_PATH_FIELD.to_string(), Value::String(segments.join("/")));
    }
}

#[async_trait]
impl MetadataType for Folder {
    fn definition(&self) -> &TypeDefinition {
        &self.def
    }

    /// Folders are always fetched in full, since a path needs every
    /// ancestor. `keys` only narrows the result.
    async fn retrieve(&self, ctx: &SyncContext, keys: Option<&[String]>) -> Result<MetadataTypeMap> {
        let mut items = soap::retrieve_soap(ctx, &self.def, None, None).await?;
        build_paths(&mut items);
        if let Some(keys) = keys {
            items.retain(|key, _| keys.contains(key));
        }
        Ok(items)
    }

    async fn post_retrieve_tasks(&self, _ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        item.remove(FOLDER_ID_FIELD);
        item.remove("ParentFolder");
        Ok(item)
    }

    async fn pre_deploy_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        let parent = field_string(&item, FOLDER_PATH_FIELD)
            .as_deref()
            .and_then(parent_path)
            .map(str::to_string);
        if let Some(parent) = parent {
            let parent_id = ctx.cache.get_folder_id(ctx.scope(), &parent)?;
            path::set(&mut item, PARENT_ID_PATH, Value::from(parent_id));
        } else {
            warn!(
                key = %field_string(&item, &self.def.key_field).unwrap_or_default(),
                "Root folder, deployed without a parent"
            );
        }
        Ok(item)
    }

    /// Updates address the folder by id.
    async fn update(&self, ctx: &SyncContext, item: &MetadataItem) -> Result<MetadataItem> {
        let mut payload = self.def.payload(item, PayloadFor::Update);
        if let Some(id) = item.get(FOLDER_ID_FIELD) {
            payload.insert(FOLDER_ID_FIELD.to_string(), id.clone());
        }
        soap::update_soap_with(ctx, &self.def, item, payload).await
    }

    /// A folder depends on its parent folder.
    fn get_nested_value(&self, item: &MetadataItem, dependent_type: &str) -> Vec<String> {
        if dependent_type != FOLDER_TYPE {
            return Vec::new();
        }
        field_string(item, FOLDER_PATH_FIELD)
            .as_deref()
            .and_then(parent_path)
            .map(|p| vec![p.to_string()])
            .unwrap_or_default()
    }

    fn order_creates(&self, items: &mut [(String, MetadataItem)]) {
        items.sort_by_cached_key(|(key, item)| {
            let path = field_string(item, FOLDER_PATH_FIELD).unwrap_or_default();
            (path.matches('/').count(), path, key.clone())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::testing::{cache_folders, ctx, item};
    use mcsync_client::mock::MockTransport;
    use serde_json::json;

    #[test]
    fn test_build_paths_follows_parents_and_survives_loops() {
        let mut items = crate::item::to_type_map(
            vec![
                json!({"CustomerKey": "root", "ID": "1", "Name": "Query", "ParentFolder": {"ID": "0"}}),
                json!({"CustomerKey": "sub", "ID": "2", "Name": "Shared", "ParentFolder": {"ID": "1"}}),
                json!({"CustomerKey": "deep", "ID": "3", "Name": "Deep", "ParentFolder": {"ID": "2"}}),
                json!({"CustomerKey": "a", "ID": "8", "Name": "A", "ParentFolder": {"ID": "9"}}),
                json!({"CustomerKey": "b", "ID": "9", "Name": "B", "ParentFolder": {"ID": "8"}}),
            ],
            "CustomerKey",
        );
        build_paths(&mut items);

        assert_eq!(items["root"]["Path"], "Query");
        assert_eq!(items["deep"]["Path"], "Query/Shared/Deep");
        assert_eq!(items["a"]["Path"], "B/A");
    }

    #[tokio::test]
    async fn test_retrieve_computes_paths_and_post_retrieve_drops_ids() {
        let transport = MockTransport::new();
        transport.soap_objects(
            "DataFolder",
            vec![
                json!({"CustomerKey": "root", "ID": "1", "Name": "Query", "ParentFolder": {"ID": "0"}}),
                json!({"CustomerKey": "sub", "ID": "2", "Name": "Shared", "ParentFolder": {"ID": "1"}}),
            ],
        );
        let ctx = ctx(&transport);
        let folder = Folder::new();

        let items = folder.retrieve(&ctx, Some(&["sub".to_string()])).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items["sub"]["Path"], "Query/Shared");

        let cleaned = folder.post_retrieve_tasks(&ctx, items["sub"].clone()).await.unwrap();
        assert!(cleaned.get("ID").is_none());
        assert!(cleaned.get("ParentFolder").is_none());
    }

    #[tokio::test]
    async fn test_pre_deploy_resolves_parent_id() {
        let transport = MockTransport::new();
        let ctx = ctx(&transport);
        cache_folders(&ctx);

        let prepared = Folder::new()
            .pre_deploy_tasks(&ctx, item(json!({"CustomerKey": "n", "Name": "New", "Path": "Query/Shared/New"})))
            .await
            .unwrap();
        assert_eq!(prepared["ParentFolder"]["ID"], 2);

        let orphan = Folder::new()
            .pre_deploy_tasks(&ctx, item(json!({"CustomerKey": "o", "Name": "O", "Path": "Nowhere/O"})))
            .await;
        assert!(orphan.is_err());
    }

    #[test]
    fn test_creates_are_parents_first() {
        let folder = Folder::new();
        assert!(folder.definition().creates_sequentially());

        let mut items = vec![
            ("c".to_string(), item(json!({"Path": "A/B/C"}))),
            ("a".to_string(), item(json!({"Path": "A"}))),
            ("b".to_string(), item(json!({"Path": "A/B"}))),
        ];
        folder.order_creates(&mut items);
        let keys: Vec<&str> = items.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b", "c"]);
        assert_eq!(folder.get_nested_value(&items[2].1, "folder"), vec!["A/B"]);
    }
}
