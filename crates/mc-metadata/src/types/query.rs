//! SQL query activities.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::SyncContext;
use crate::definition::{ApiKind, FieldSpec, RestEndpoints, TypeDefinition};
use crate::error::{Error, Result};
use crate::filter::FOLDER_RELATION_FIELD;
use crate::item::{field_string, MetadataItem};
use crate::metadata_type::MetadataType;
use crate::types::data_extension::DATA_EXTENSION_TYPE;
use crate::types::{folder_id_to_path, folder_path_to_id};

/// The query adapter.
#[derive(Debug, Clone)]
pub struct Query {
    def: TypeDefinition,
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

impl Query {
    pub fn new() -> Self {
        let mut rest = RestEndpoints::new("/automation/v1/queries", "/automation/v1/queries/{id}");
        rest.key_filter = Some("$filter=key%20eq%20'{key}'".to_string());

        let def = TypeDefinition::builder("query", ApiKind::Rest, "key")
            .id_field("queryDefinitionId")
            .name_field("name")
            .rest(rest)
            .field("queryDefinitionId", FieldSpec::read_only())
            .field("key", FieldSpec::all())
            .field("name", FieldSpec::all())
            .field("description", FieldSpec::all())
            .field("queryText", FieldSpec::all())
            .field("targetKey", FieldSpec::all())
            .field("targetUpdateTypeName", FieldSpec::all())
            .field("targetId", FieldSpec::reference())
            .field("targetName", FieldSpec::reference())
            .field("categoryId", FieldSpec::reference())
            .field("createdDate", FieldSpec::read_only())
            .field("modifiedDate", FieldSpec::read_only())
            .field(FOLDER_RELATION_FIELD, FieldSpec::local())
            .code_field("queryText", &["sql"])
            .depends_on_field("folder", FOLDER_RELATION_FIELD, "Path")
            .depends_on(DATA_EXTENSION_TYPE, "targetKey")
            .supports_delete(true)
            .build();
        Self { def }
    }
}

#[async_trait]
impl MetadataType for Query {
    fn definition(&self) -> &TypeDefinition {
        &self.def
    }

    async fn post_retrieve_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_id_to_path(ctx, &self.def, &mut item, "categoryId");
        item.remove("targetId");
        item.remove("targetName");
        Ok(item)
    }

    /// Resolves the folder and the target data extension, both required.
    async fn pre_deploy_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_path_to_id(ctx, &self.def, &mut item, "categoryId")?;

        let key = field_string(&item, &self.def.key_field).unwrap_or_default();
        let target_key = field_string(&item, "targetKey")
            .ok_or_else(|| Error::invalid_item(&self.def.type_name, &key, "targetKey is required"))?;
        let target_id = ctx.cache.search_for_string(
            ctx.scope(),
            DATA_EXTENSION_TYPE,
            &target_key,
            "CustomerKey",
            "ObjectID",
        )?;
        item.insert("targetId".to_string(), Value::String(target_id));

        match ctx
            .cache
            .search_for_string(ctx.scope(), DATA_EXTENSION_TYPE, &target_key, "CustomerKey", "Name")
        {
            Ok(name) => {
                item.insert("targetName".to_string(), Value::String(name));
            }
            Err(err) => warn!(key = %key, error = %err, "Target data extension has no name in cache"),
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LookupError;
    use crate::error::ErrorKind;
    use crate::item::{to_type_map, MetadataTypeMap};
    use crate::types::testing::{cache_folders, ctx, item};
    use mcsync_client::mock::MockTransport;
    use serde_json::json;

    fn cache_target(ctx: &SyncContext) {
        ctx.cache.set_metadata(
            ctx.scope(),
            DATA_EXTENSION_TYPE,
            to_type_map(
                vec![json!({"CustomerKey": "de1", "ObjectID": "abc", "Name": "Orders"})],
                "CustomerKey",
            ),
        );
    }

    #[tokio::test]
    async fn test_pre_deploy_resolves_folder_and_target() {
        let transport = MockTransport::new();
        let ctx = ctx(&transport);
        cache_folders(&ctx);
        cache_target(&ctx);

        let prepared = Query::new()
            .pre_deploy_tasks(
                &ctx,
                item(json!({"key": "q1", "targetKey": "de1", "r__folder_Path": "Query"})),
            )
            .await
            .unwrap();
        assert_eq!(prepared["categoryId"], 1);
        assert_eq!(prepared["targetId"], "abc");
        assert_eq!(prepared["targetName"], "Orders");
    }

    #[tokio::test]
    async fn test_unknown_target_is_an_item_error() {
        let transport = MockTransport::new();
        let ctx = ctx(&transport);
        cache_folders(&ctx);
        ctx.cache
            .set_metadata(ctx.scope(), DATA_EXTENSION_TYPE, MetadataTypeMap::new());

        let err = Query::new()
            .pre_deploy_tasks(
                &ctx,
                item(json!({"key": "q1", "targetKey": "nope", "r__folder_Path": "Query"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind,
            ErrorKind::Lookup(LookupError::ItemNotFound { .. })
        ));
    }

    #[test]
    fn test_query_text_is_extracted_to_sql() {
        let query = Query::new();
        let extracted = query
            .extract_code(&item(json!({"key": "q1", "queryText": "SELECT 1"})))
            .unwrap();
        assert_eq!(extracted.code[0].file_ext, "sql");
        assert!(extracted.json.get("queryText").is_none());
        assert_eq!(query.get_nested_value(&item(json!({"targetKey": "de1"})), "dataExtension"), vec!["de1"]);
    }
}
