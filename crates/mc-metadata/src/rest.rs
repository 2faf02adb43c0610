//! Generic REST operations shared by REST-backed types.

use serde_json::Value;
use tracing::{debug, instrument, warn};

use mcsync_client::security::url::encode_param;

use crate::concurrency::bounded;
use crate::config::SyncContext;
use crate::definition::{PayloadFor, RestEndpoints, TypeDefinition};
use crate::error::{Error, ErrorKind, Result};
use crate::item::{field_string, to_type_map, MetadataItem, MetadataTypeMap};

fn endpoints(def: &TypeDefinition) -> Result<&RestEndpoints> {
    def.rest.as_ref().ok_or_else(|| {
        Error::new(ErrorKind::Config(format!(
            "{} has no REST endpoints",
            def.type_name
        )))
    })
}

fn with_query(uri: &str, query: &str) -> String {
    let sep = if uri.contains('?') { '&' } else { '?' };
    format!("{uri}{sep}{query}")
}

fn items_of(body: &Value, field: &str) -> Vec<Value> {
    match body.get(field) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// Fetch every item of the collection, following pages.
async fn list_all(ctx: &SyncContext, rest: &RestEndpoints) -> Result<Vec<Value>> {
    let Some(page_size) = rest.page_size else {
        let body = ctx.transport.get(&rest.collection).await?;
        return Ok(items_of(&body, &rest.items_field));
    };

    let mut all = Vec::new();
    let mut page = 1;
    loop {
        let uri = with_query(&rest.collection, &format!("$page={page}&$pageSize={page_size}"));
        let body = ctx.transport.get(&uri).await?;
        let items = items_of(&body, &rest.items_field);
        let fetched = items.len();
        all.extend(items);

        // Without a count, a short page is the last one.
        let done = match body.get("count").and_then(Value::as_u64) {
            Some(total) => all.len() >= total as usize,
            None => fetched < page_size as usize,
        };
        if fetched == 0 || done {
            break;
        }
        page += 1;
    }
    Ok(all)
}

/// Fetch the full body of each listed item. A failing item is logged and
/// left out.
async fn fetch_details(ctx: &SyncContext, def: &TypeDefinition, rest: &RestEndpoints, summaries: Vec<Value>) -> Vec<Value> {
    let results = bounded(summaries, ctx.config.concurrency, |summary| async move {
        let id = summary
            .as_object()
            .and_then(|o| field_string(o, &def.id_field));
        let Some(id) = id else {
            return Ok(summary);
        };
        ctx.transport
            .get(&rest.item_uri(&id))
            .await
            .map_err(|e| (id, Error::from(e)))
    })
    .await;

    results
        .into_iter()
        .filter_map(|result| match result {
            Ok(item) => Some(item),
            Err((id, err)) => {
                warn!(
                    metadata_type = %def.type_name,
                    id = %id,
                    messages = ?err.messages(),
                    "Failed to fetch item, skipping"
                );
                None
            }
        })
        .collect()
}

/// Retrieve items of a REST type.
///
/// With keys and a key filter, each key is a filtered request; without a
/// key filter the collection is listed and reduced to the keys before any
/// details are fetched.
#[instrument(skip(ctx, def), fields(metadata_type = %def.type_name))]
pub async fn retrieve_rest(ctx: &SyncContext, def: &TypeDefinition, keys: Option<&[String]>) -> Result<MetadataTypeMap> {
    let rest = endpoints(def)?;

    let items = match (keys, &rest.key_filter) {
        (Some(keys), Some(filter)) => {
            let results = bounded(keys.to_vec(), ctx.config.concurrency, |key| async move {
                let uri = with_query(&rest.collection, &filter.replace("{key}", &encode_param(&key)));
                ctx.transport.get(&uri).await.map_err(|e| (key, Error::from(e)))
            })
            .await;
            let mut items = Vec::new();
            for result in results {
                match result {
                    Ok(body) => items.extend(items_of(&body, &rest.items_field)),
                    Err((key, err)) => warn!(
                        metadata_type = %def.type_name,
                        key = %key,
                        messages = ?err.messages(),
                        "Failed to retrieve item, skipping"
                    ),
                }
            }
            items
        }
        (Some(keys), None) => {
            let mut items = list_all(ctx, rest).await?;
            items.retain(|item| {
                item.as_object()
                    .and_then(|o| field_string(o, &def.key_field))
                    .is_some_and(|key| keys.contains(&key))
            });
            items
        }
        (None, _) => list_all(ctx, rest).await?,
    };

    let items = if rest.detail_fetch {
        fetch_details(ctx, def, rest, items).await
    } else {
        items
    };

    let mut map = to_type_map(items, &def.key_field);
    if let Some(keys) = keys {
        map.retain(|key, _| keys.contains(key));
    }
    debug!(count = map.len(), "Retrieved");
    Ok(map)
}

/// Merge a write response over the item that was sent.
fn merged(item: &MetadataItem, response: Value) -> MetadataItem {
    let mut out = item.clone();
    if let Value::Object(fields) = response {
        out.extend(fields);
    }
    out
}

/// POST a new item.
#[instrument(skip(ctx, def, item), fields(metadata_type = %def.type_name))]
pub async fn create_rest(ctx: &SyncContext, def: &TypeDefinition, item: &MetadataItem) -> Result<MetadataItem> {
    let rest = endpoints(def)?;
    let payload = Value::Object(def.payload(item, PayloadFor::Create));
    let response = ctx.transport.post(&rest.collection, &payload).await?;
    Ok(merged(item, response))
}

/// PATCH (or PUT) an existing item by its id.
#[instrument(skip(ctx, def, item), fields(metadata_type = %def.type_name))]
pub async fn update_rest(ctx: &SyncContext, def: &TypeDefinition, item: &MetadataItem) -> Result<MetadataItem> {
    let rest = endpoints(def)?;
    let id = field_string(item, &def.id_field).ok_or_else(|| {
        Error::invalid_item(
            &def.type_name,
            field_string(item, &def.key_field).unwrap_or_default(),
            format!("cannot update without {}", def.id_field),
        )
    })?;
    let uri = rest.item_uri(&id);
    let payload = Value::Object(def.payload(item, PayloadFor::Update));
    let response = if rest.update_with_put {
        ctx.transport.put(&uri, &payload).await?
    } else {
        ctx.transport.patch(&uri, &payload).await?
    };
    Ok(merged(item, response))
}

/// DELETE the item with `key`, looking its id up in the cache first and
/// remotely when it is not cached.
#[instrument(skip(ctx, def), fields(metadata_type = %def.type_name))]
pub async fn delete_by_key_rest(ctx: &SyncContext, def: &TypeDefinition, key: &str) -> Result<()> {
    let rest = endpoints(def)?;
    let cached = ctx
        .cache
        .search_for_string(ctx.scope(), &def.type_name, key, &def.key_field, &def.id_field)
        .ok();
    let id = match cached {
        Some(id) => id,
        None => {
            let found = retrieve_rest(ctx, def, Some(&[key.to_string()])).await?;
            found
                .get(key)
                .and_then(|item| field_string(item, &def.id_field))
                .ok_or_else(|| Error::invalid_item(&def.type_name, key, "not found on server"))?
        }
    };
    ctx.transport.delete(&rest.item_uri(&id)).await?;
    Ok(())
}
