//! Generic SOAP operations shared by SOAP-backed types.

use serde_json::Value;
use tracing::{debug, instrument};

use mcsync_client::{SoapAction, SoapFilter, SoapPayload};

use crate::config::SyncContext;
use crate::definition::{PayloadFor, TypeDefinition};
use crate::error::{Error, ErrorKind, Result};
use crate::item::{field_string, to_type_map, MetadataItem, MetadataTypeMap};

fn object_type(def: &TypeDefinition) -> Result<&str> {
    def.soap_object.as_deref().ok_or_else(|| {
        Error::new(ErrorKind::Config(format!(
            "{} has no SOAP object type",
            def.type_name
        )))
    })
}

/// Filter selecting `values` of `property`.
pub fn key_filter(property: &str, values: &[String]) -> SoapFilter {
    match values {
        [single] => SoapFilter::equals(property, single.clone()),
        many => SoapFilter::one_of(property, many.to_vec()),
    }
}

/// Retrieve raw objects of any SOAP object type.
pub async fn retrieve_objects(
    ctx: &SyncContext,
    object_type: &str,
    properties: Vec<String>,
    filter: Option<SoapFilter>,
) -> Result<Vec<Value>> {
    let response = ctx
        .transport
        .soap(
            object_type,
            SoapAction::Retrieve,
            SoapPayload::Retrieve {
                properties,
                filter,
                query_all_accounts: false,
            },
        )
        .await?;
    Ok(response.results)
}

/// Retrieve items of a SOAP type, optionally restricted to keys and an
/// extra filter.
#[instrument(skip(ctx, def, extra_filter), fields(metadata_type = %def.type_name))]
pub async fn retrieve_soap(
    ctx: &SyncContext,
    def: &TypeDefinition,
    keys: Option<&[String]>,
    extra_filter: Option<SoapFilter>,
) -> Result<MetadataTypeMap> {
    let object = object_type(def)?;
    let key_part = keys
        .filter(|k| !k.is_empty())
        .map(|k| key_filter(&def.key_field, k));
    let filter = match (key_part, extra_filter) {
        (Some(a), Some(b)) => Some(a.and(b)),
        (a, b) => a.or(b),
    };

    let results = retrieve_objects(ctx, object, def.retrieve_fields(), filter).await?;
    let map = to_type_map(results, &def.key_field);
    debug!(count = map.len(), "Retrieved");
    Ok(map)
}

fn first_result(def: &TypeDefinition, item: &MetadataItem, results: Vec<Value>) -> Result<Value> {
    results.into_iter().next().ok_or_else(|| {
        Error::invalid_item(
            &def.type_name,
            field_string(item, &def.key_field).unwrap_or_default(),
            "empty SOAP response",
        )
    })
}

/// Create one object. The new id is copied into the id field.
#[instrument(skip(ctx, def, item), fields(metadata_type = %def.type_name))]
pub async fn create_soap(ctx: &SyncContext, def: &TypeDefinition, item: &MetadataItem) -> Result<MetadataItem> {
    create_soap_with(ctx, def, item, def.payload(item, PayloadFor::Create)).await
}

/// Create one object from an already shaped payload.
pub async fn create_soap_with(
    ctx: &SyncContext,
    def: &TypeDefinition,
    item: &MetadataItem,
    payload: MetadataItem,
) -> Result<MetadataItem> {
    let object = object_type(def)?;
    let response = ctx
        .transport
        .soap(object, SoapAction::Create, SoapPayload::Objects(vec![Value::Object(payload)]))
        .await?;
    let result = first_result(def, item, response.results)?;

    let mut created = item.clone();
    if let Some(id) = result
        .get("NewObjectID")
        .or_else(|| result.get("NewID"))
        .filter(|v| !matches!(v, Value::String(s) if s.is_empty() || s == "0"))
    {
        created.insert(def.id_field.clone(), id.clone());
    }
    Ok(created)
}

/// Update one object, identified by its key.
#[instrument(skip(ctx, def, item), fields(metadata_type = %def.type_name))]
pub async fn update_soap(ctx: &SyncContext, def: &TypeDefinition, item: &MetadataItem) -> Result<MetadataItem> {
    update_soap_with(ctx, def, item, def.payload(item, PayloadFor::Update)).await
}

/// Update one object from an already shaped payload.
pub async fn update_soap_with(
    ctx: &SyncContext,
    def: &TypeDefinition,
    item: &MetadataItem,
    payload: MetadataItem,
) -> Result<MetadataItem> {
    let object = object_type(def)?;
    let response = ctx
        .transport
        .soap(object, SoapAction::Update, SoapPayload::Objects(vec![Value::Object(payload)]))
        .await?;
    first_result(def, item, response.results)?;
    Ok(item.clone())
}

/// Delete the object with `key`.
#[instrument(skip(ctx, def), fields(metadata_type = %def.type_name))]
pub async fn delete_by_key_soap(ctx: &SyncContext, def: &TypeDefinition, key: &str) -> Result<()> {
    let object = object_type(def)?;
    let mut payload = serde_json::Map::new();
    payload.insert(def.key_field.clone(), Value::String(key.to_string()));
    ctx.transport
        .soap(object, SoapAction::Delete, SoapPayload::Objects(vec![Value::Object(payload)]))
        .await?;
    Ok(())
}
