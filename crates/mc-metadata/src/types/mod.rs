//! Bundled metadata type adapters.
//!
//! Each adapter owns its [`TypeDefinition`](crate::definition::TypeDefinition)
//! and overrides the [`MetadataType`](crate::MetadataType) hooks its API
//! needs. Folder references are stored locally as a path in
//! [`FOLDER_RELATION_FIELD`] instead of the environment-specific id.

mod data_extension;
mod folder;
mod query;
mod script;

pub use data_extension::DataExtension;
pub use folder::Folder;
pub use query::Query;
pub use script::Script;

use serde_json::Value;
use tracing::warn;

use crate::config::SyncContext;
use crate::definition::TypeDefinition;
use crate::error::{Error, Result};
use crate::filter::FOLDER_RELATION_FIELD;
use crate::item::{field_string, MetadataItem};

/// Replace the folder id in `id_field` with the folder path.
///
/// A folder missing from the cache only logs a warning; the id is dropped
/// either way since it means nothing in another business unit.
pub(crate) fn folder_id_to_path(ctx: &SyncContext, def: &TypeDefinition, item: &mut MetadataItem, id_field: &str) {
    let Some(id) = item.remove(id_field).as_ref().and_then(crate::path::scalar_string) else {
        return;
    };
    match ctx.cache.get_folder_path(ctx.scope(), &id) {
        Ok(path) => {
            item.insert(FOLDER_RELATION_FIELD.to_string(), Value::String(path));
        }
        Err(err) => warn!(
            metadata_type = %def.type_name,
            key = %field_string(item, &def.key_field).unwrap_or_default(),
            folder_id = %id,
            error = %err,
            "Folder not found in cache, folder path left unset"
        ),
    }
}

/// Resolve the folder path back to the id the API expects in `id_field`.
pub(crate) fn folder_path_to_id(ctx: &SyncContext, def: &TypeDefinition, item: &mut MetadataItem, id_field: &str) -> Result<()> {
    let key = field_string(item, &def.key_field).unwrap_or_default();
    let path = field_string(item, FOLDER_RELATION_FIELD).ok_or_else(|| {
        Error::invalid_item(&def.type_name, &key, format!("{FOLDER_RELATION_FIELD} is required"))
    })?;
    let id = ctx.cache.get_folder_id(ctx.scope(), &path)?;
    item.insert(id_field.to_string(), Value::from(id));
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use mcsync_auth::BusinessUnit;
    use mcsync_client::mock::MockTransport;
    use serde_json::json;

    use crate::cache::FOLDER_TYPE;
    use crate::config::{SyncConfig, SyncContext};
    use crate::item::{to_type_map, MetadataItem};

    pub fn ctx(transport: &MockTransport) -> SyncContext {
        SyncContext::new(
            Arc::new(transport.clone()),
            BusinessUnit::new("cred", "Child", "200", "100"),
            SyncConfig::default(),
        )
        .unwrap()
    }

    /// Cache two folders, `Query` (1) and `Query/Shared` (2).
    pub fn cache_folders(ctx: &SyncContext) {
        ctx.cache.set_metadata(
            ctx.scope(),
            FOLDER_TYPE,
            to_type_map(
                vec![
                    json!({"CustomerKey": "f1", "ID": "1", "Path": "Query"}),
                    json!({"CustomerKey": "f2", "ID": "2", "Path": "Query/Shared"}),
                ],
                "CustomerKey",
            ),
        );
    }

    pub fn item(value: serde_json::Value) -> MetadataItem {
        value.as_object().unwrap().clone()
    }
}
