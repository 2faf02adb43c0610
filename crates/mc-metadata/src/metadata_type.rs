//! The contract every metadata type implements.
//!
//! A type supplies its [`TypeDefinition`] and overrides only the hooks it
//! needs. The defaults route to the generic REST or SOAP operations picked
//! by the definition's [`ApiKind`].

use async_trait::async_trait;

use crate::code::{self, CodeFile, Extracted};
use crate::config::SyncContext;
use crate::definition::{ApiKind, TypeDefinition};
use crate::diff;
use crate::error::{Error, Result};
use crate::item::{MetadataItem, MetadataTypeMap};
use crate::path;
use crate::pipeline::UpsertReport;
use crate::{rest, soap};

/// One kind of metadata.
#[async_trait]
pub trait MetadataType: Send + Sync {
    /// Static definition of the type.
    fn definition(&self) -> &TypeDefinition;

    /// Type name, shorthand for `definition().type_name`.
    fn name(&self) -> &str {
        &self.definition().type_name
    }

    /// Fetch remote items, all of them or only `keys`.
    async fn retrieve(&self, ctx: &SyncContext, keys: Option<&[String]>) -> Result<MetadataTypeMap> {
        let def = self.definition();
        match def.api {
            ApiKind::Rest => rest::retrieve_rest(ctx, def, keys).await,
            ApiKind::Soap => soap::retrieve_soap(ctx, def, keys, None).await,
        }
    }

    /// Normalize a fetched item before it is saved, e.g. replace ids with
    /// cache-resolved names.
    async fn post_retrieve_tasks(&self, _ctx: &SyncContext, item: MetadataItem) -> Result<MetadataItem> {
        Ok(item)
    }

    /// Prepare a local item for the API, e.g. resolve names back to ids.
    async fn pre_deploy_tasks(&self, _ctx: &SyncContext, item: MetadataItem) -> Result<MetadataItem> {
        Ok(item)
    }

    /// Create one item and return it as deployed.
    async fn create(&self, ctx: &SyncContext, item: &MetadataItem) -> Result<MetadataItem> {
        let def = self.definition();
        match def.api {
            ApiKind::Rest => rest::create_rest(ctx, def, item).await,
            ApiKind::Soap => soap::create_soap(ctx, def, item).await,
        }
    }

    /// Update one item and return it as deployed.
    async fn update(&self, ctx: &SyncContext, item: &MetadataItem) -> Result<MetadataItem> {
        let def = self.definition();
        match def.api {
            ApiKind::Rest => rest::update_rest(ctx, def, item).await,
            ApiKind::Soap => soap::update_soap(ctx, def, item).await,
        }
    }

    async fn post_create_tasks(&self, _ctx: &SyncContext, created: MetadataItem) -> Result<MetadataItem> {
        Ok(created)
    }

    async fn post_update_tasks(&self, _ctx: &SyncContext, updated: MetadataItem) -> Result<MetadataItem> {
        Ok(updated)
    }

    /// Runs once after a whole upsert batch.
    async fn post_deploy_tasks(&self, _ctx: &SyncContext, _report: &UpsertReport) -> Result<()> {
        Ok(())
    }

    /// Delete the remote item with `key`.
    async fn delete_by_key(&self, ctx: &SyncContext, key: &str) -> Result<()> {
        let def = self.definition();
        if !def.supports_delete {
            return Err(Error::unsupported(&def.type_name, "delete"));
        }
        match def.api {
            ApiKind::Rest => rest::delete_by_key_rest(ctx, def, key).await,
            ApiKind::Soap => soap::delete_by_key_soap(ctx, def, key).await,
        }
    }

    /// Updatable fields that differ between baseline and candidate.
    fn changed_fields(&self, baseline: &MetadataItem, candidate: &MetadataItem) -> Vec<String> {
        diff::changed_fields(self.definition(), baseline, candidate)
    }

    fn has_changed(&self, baseline: &MetadataItem, candidate: &MetadataItem) -> bool {
        !self.changed_fields(baseline, candidate).is_empty()
    }

    /// Keys of `dependent_type` referenced by `item`.
    fn get_nested_value(&self, item: &MetadataItem, dependent_type: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .definition()
            .refs_to(dependent_type)
            .flat_map(|r| path::collect_strings(item, &r.path))
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Split embedded code out of an item.
    fn extract_code(&self, item: &MetadataItem) -> Result<Extracted> {
        code::extract(self.definition(), item)
    }

    /// Put code files back into an item.
    fn merge_code(&self, json: &MetadataItem, files: &[CodeFile]) -> Result<MetadataItem> {
        code::merge(self.definition(), json, files)
    }

    /// Markdown page written next to a retrieved item.
    fn document(&self, _item: &MetadataItem) -> Option<String> {
        None
    }

    /// Order a batch of creates; only relevant when creates run one by one.
    fn order_creates(&self, _items: &mut [(String, MetadataItem)]) {}
}
