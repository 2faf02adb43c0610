//! Server-side script activities.
//!
//! A script that is a single `<script runat="server">` block is stored as
//! its bare body in `.ssjs`; anything else is stored verbatim as `.html`.

use async_trait::async_trait;
use serde_json::Value;

use crate::code::{self, CodeFile, Extracted};
use crate::config::SyncContext;
use crate::definition::{ApiKind, FieldSpec, RestEndpoints, TypeDefinition};
use crate::error::{Error, Result};
use crate::filter::FOLDER_RELATION_FIELD;
use crate::item::{field_string, MetadataItem};
use crate::metadata_type::MetadataType;
use crate::types::{folder_id_to_path, folder_path_to_id};

const SCRIPT_FIELD: &str = "script";

/// The script adapter.
#[derive(Debug, Clone)]
pub struct Script {
    def: TypeDefinition,
}

impl Default for Script {
    fn default() -> Self {
        Self::new()
    }
}

impl Script {
    pub fn new() -> Self {
        let mut rest = RestEndpoints::new("/automation/v1/scripts", "/automation/v1/scripts/{id}");
        rest.detail_fetch = true;

        let def = TypeDefinition::builder("script", ApiKind::Rest, "key")
            .id_field("ssjsActivityId")
            .name_field("name")
            .rest(rest)
            .field("ssjsActivityId", FieldSpec::read_only())
            .field("key", FieldSpec::all())
            .field("name", FieldSpec::all())
            .field("description", FieldSpec::all())
            .field(SCRIPT_FIELD, FieldSpec::all())
            .field("categoryId", FieldSpec::reference())
            .field("createdDate", FieldSpec::read_only())
            .field("modifiedDate", FieldSpec::read_only())
            .field(FOLDER_RELATION_FIELD, FieldSpec::local())
            .code_field(SCRIPT_FIELD, &["ssjs", "html"])
            .depends_on_field("folder", FOLDER_RELATION_FIELD, "Path")
            .supports_delete(true)
            .build();
        Self { def }
    }

    fn key(&self, item: &MetadataItem) -> Result<String> {
        field_string(item, &self.def.key_field).ok_or_else(|| {
            Error::invalid_item(&self.def.type_name, "?", format!("missing key field {}", self.def.key_field))
        })
    }
}

#[async_trait]
impl MetadataType for Script {
    fn definition(&self) -> &TypeDefinition {
        &self.def
    }

    async fn post_retrieve_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_id_to_path(ctx, &self.def, &mut item, "categoryId");
        Ok(item)
    }

    async fn pre_deploy_tasks(&self, ctx: &SyncContext, mut item: MetadataItem) -> Result<MetadataItem> {
        folder_path_to_id(ctx, &self.def, &mut item, "categoryId")?;
        Ok(item)
    }

    fn extract_code(&self, item: &MetadataItem) -> Result<Extracted> {
        let mut json = item.clone();
        let Some(Value::String(content)) = json.remove(SCRIPT_FIELD) else {
            return Ok(Extracted { json, code: Vec::new() });
        };
        let key = self.key(item)?;
        let file = match code::ssjs_body(&content) {
            Some(body) => CodeFile::sibling(&self.def.type_name, &key, "ssjs", body),
            None => {
                code::looks_like_html(&self.def.type_name, &key, &content);
                CodeFile::sibling(&self.def.type_name, &key, "html", content.as_str())
            }
        };
        Ok(Extracted { json, code: vec![file] })
    }

    fn merge_code(&self, json: &MetadataItem, files: &[CodeFile]) -> Result<MetadataItem> {
        let key = self.key(json)?;
        let content = if let Some(ssjs) = files.iter().find(|f| f.file_ext == "ssjs") {
            code::wrap_ssjs(&ssjs.content)
        } else if let Some(html) = files.iter().find(|f| f.file_ext == "html") {
            html.content.clone()
        } else {
            return Err(code::missing_file(&self.def, &key, Some(&"ssjs".to_string())));
        };
        let mut item = json.clone();
        item.insert(SCRIPT_FIELD.to_string(), Value::String(content));
        Ok(item)
    }
}
