//! Data extensions and their fields.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::SyncContext;
use crate::definition::{ApiKind, FieldSpec, PayloadFor, TypeDefinition};
use crate::error::Result;
use crate::filter::FOLDER_RELATION_FIELD;
use crate::item::{field_string, MetadataItem, MetadataTypeMap};
use crate::metadata_type::MetadataType;
use crate::path;
use crate::soap;
use crate::types::{folder_id_to_path, folder_path_to_id};

/// Type name of data extensions.
pub const DATA_EXTENSION_TYPE: &str = "dataExtension";

const FIELDS: &str = "Fields";
const FIELD_OBJECT: &str = "DataExtensionField";
const FIELD_OWNER: &str = "DataExtension.CustomerKey";

/// Field properties kept locally, in this order.
const FIELD_PROPERTIES: &[&str] = &[
    "Name",
    "FieldType",
    "MaxLength",
    "Scale",
    "IsPrimaryKey",
    "IsRequired",
    "DefaultValue",
];

/// The data extension adapter.
#[derive(Debug, Clone)]
pub struct DataExtension {
    def: TypeDefinition,
}

impl Default for DataExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl DataExtension {
    pub fn new() -> Self {
        let def = TypeDefinition::builder(DATA_EXTENSION_TYPE, ApiKind::Soap, "CustomerKey")
            .id_field("ObjectID")
            .name_field("Name")
            .soap_object("DataExtension")
            .field("ObjectID", FieldSpec::read_only())
            .field("CustomerKey", FieldSpec::all())
            .field("Name", FieldSpec::all())
            .field("Description", FieldSpec::all())
            .field("IsSendable", FieldSpec::create_only())
            .field("IsTestable", FieldSpec::all())
            .field("DataRetentionPeriodLength", FieldSpec::all())
            .field("CategoryID", FieldSpec::reference())
            .field(
                FIELDS,
                FieldSpec {
                    retrieve: false,
                    ..FieldSpec::all()
                },
            )
            .field(FOLDER_RELATION_FIELD, FieldSpec::local())
            .depends_on_field("folder", FOLDER_RELATION_FIELD, "Path")
            .build();
        Self { def }
    }
}

/// Keep the comparable properties of a field.
fn normalize_field(field: &Map<String, Value>) -> Value {
    let kept: Map<String, Value> = FIELD_PROPERTIES
        .iter()
        .filter_map(|name| {
            field
                .get(*name)
                .filter(|v| !v.is_null() && v.as_str() != Some(""))
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect();
    Value::Object(kept)
}

fn ordinal(field: &Map<String, Value>) -> i64 {
    field
        .get("Ordinal")
        .and_then(path::scalar_string)
        .and_then(|s| s.parse().ok())
        .unwrap_or(i64::MAX)
}

/// Group retrieved `DataExtensionField` objects by owner key, sorted by
/// ordinal.
fn group_fields(results: Vec<Value>) -> BTreeMap<String, Vec<Value>> {
    let mut grouped: BTreeMap<String, Vec<Map<String, Value>>> = BTreeMap::new();
    for result in results {
        let Value::Object(field) = result else {
            continue;
        };
        let Some(owner) = path::collect_strings(&field, FIELD_OWNER).into_iter().next() else {
            continue;
        };
        grouped.entry(owner).or_default().push(field);
    }
    grouped
        .into_iter()
        .map(|(owner, mut fields)| {
            fields.sort_by_key(ordinal);
            (owner, fields.iter().map(normalize_field).collect())
        })
        .collect()
}

/// Wrap the field list the way the SOAP object expects it.
fn soap_payload(mut payload: MetadataItem, fields: Vec<Value>) -> MetadataItem {
    payload.remove(FIELDS);
    if !fields.is_empty() {
        let mut wrapper = Map::new();
        wrapper.insert("Field".to_string(), Value::Array(fields));
        payload.insert(FIELDS.to_string(), Value::Object(wrapper));
    }
    payload
}

fn fields_of(item: &MetadataItem) -> Vec<Value> {
    match item.get(FIELDS) {
        Some(Value::Array(fields)) => fields.clone(),
        _ => Vec::new(),
    }
}

fn field_name(field: &Value) -> Option<&str> {
    field.get("Name").and_then(Value::as_str)
}

fn cell(field: &Value, name: &str) -> String {
    field
        .get(name)
        .and_then(path::scalar_string)
        .unwrap_or_default()
        .replace('|', "\\|")
}

#[async_trait]
impl MetadataType for DataExtension {
    fn definition(&self) -> &TypeDefinition {
        &self.def
    }

    /// Data extensions come with their fields, fetched in one extra request.
    async fn retrieve(&self, ctx: &SyncContext, keys: Option<&[String]>) -> Result<MetadataTypeMap> {
        let mut items = soap::retrieve_soap(ctx, &self.def, keys, None).await?;
        if items.is_empty() {
            return Ok(items);
        }

        let owners: Vec<String> = items.keys().cloned().collect();
        let mut properties: Vec<String> = FIELD_PROPERTIES.iter().map(|p| p.to_string()).collect();
        properties.extend(["Ordinal".to_string(), FIELD_OWNER.to_string()]);
        let results = soap::retrieve_objects(
            ctx,
            FIELD_OBJECT,
            properties,
            Some(soap::key_filter(FIELD_OWNER, &owners)),
        )
        .await?;

        let mut grouped = group_fields(results);
        for (key, item) in items.iter_mut() {
            let fields = grouped.remove(key).unwrap_or_default();
            item.insert(FIELDS.to_string(), Value::Array(fields));
        }
        Ok(items)
    }

    async fn post_retrieve_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_id_to_path(ctx, &self.def, &mut item, "CategoryID");
        Ok(item)
    }

    async fn pre_deploy_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_path_to_id(ctx, &self.def, &mut item, "CategoryID")?;
        Ok(item)
    }

    async fn create(&self, ctx: &SyncContext, item: &MetadataItem) -> Result<MetadataItem> {
        let payload = soap_payload(self.def.payload(item, PayloadFor::Create), fields_of(item));
        soap::create_soap_with(ctx, &self.def, item, payload).await
    }

    /// Existing fields cannot be redefined; only new fields are sent.
    async fn update(&self, ctx: &SyncContext, item: &MetadataItem) -> Result<MetadataItem> {
        let key = field_string(item, &self.def.key_field).unwrap_or_default();
        let existing: Vec<String> = ctx
            .cache
            .get_item(ctx.scope(), DATA_EXTENSION_TYPE, &key)
            .map(|cached| fields_of(&cached).iter().filter_map(field_name).map(str::to_string).collect())
            .unwrap_or_default();
        let added = fields_of(item)
            .into_iter()
            .filter(|f| field_name(f).is_some_and(|n| !existing.iter().any(|e| e == n)))
            .collect();

        let payload = soap_payload(self.def.payload(item, PayloadFor::Update), added);
        soap::update_soap_with(ctx, &self.def, item, payload).await
    }

    fn document(&self, item: &MetadataItem) -> Option<String> {
        let fields = fields_of(item);
        let mut doc = String::new();
        let name = field_string(item, "Name").unwrap_or_default();
        let _ = writeln!(doc, "# {name}\n");
        if let Some(description) = field_string(item, "Description").filter(|d| !d.is_empty()) {
            let _ = writeln!(doc, "{description}\n");
        }
        if let Some(folder) = field_string(item, FOLDER_RELATION_FIELD) {
            let _ = writeln!(doc, "Folder: `{folder}`\n");
        }
        doc.push_str("| Name | Type | Length | Primary Key | Required | Default |\n");
        doc.push_str("|---|---|---|---|---|---|\n");
        for field in &fields {
            let _ = writeln!(
                doc,
                "| {} | {} | {} | {} | {} | {} |",
                cell(field, "Name"),
                cell(field, "FieldType"),
                cell(field, "MaxLength"),
                cell(field, "IsPrimaryKey"),
                cell(field, "IsRequired"),
                cell(field, "DefaultValue"),
            );
        }
        Some(doc)
    }
}
