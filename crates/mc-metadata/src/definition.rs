//! Static per-type contract.

use std::collections::BTreeMap;

use crate::item::MetadataItem;

/// Which API family a type is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    Rest,
    Soap,
}

/// How a single field takes part in each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Sent on create.
    pub create: bool,
    /// Sent on update and compared by the diff.
    pub update: bool,
    /// Requested on retrieve.
    pub retrieve: bool,
    /// Kept when building a template.
    pub template: bool,
}

impl FieldSpec {
    /// Creatable, updatable, retrievable and templated.
    pub const fn all() -> Self {
        Self {
            create: true,
            update: true,
            retrieve: true,
            template: true,
        }
    }

    /// Set on create only, never changed afterwards.
    pub const fn create_only() -> Self {
        Self {
            create: true,
            update: false,
            retrieve: true,
            template: true,
        }
    }

    /// Server-assigned; read but never sent or templated.
    pub const fn read_only() -> Self {
        Self {
            create: false,
            update: false,
            retrieve: true,
            template: false,
        }
    }

    /// Environment-specific reference: sent, but not part of a template.
    pub const fn reference() -> Self {
        Self {
            create: true,
            update: true,
            retrieve: true,
            template: false,
        }
    }

    /// Computed locally; kept in files and templates, never sent or requested.
    pub const fn local() -> Self {
        Self {
            create: false,
            update: false,
            retrieve: false,
            template: true,
        }
    }
}

/// Where the keys of a dependent type are found inside an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    /// The referenced type.
    pub metadata_type: String,
    /// Dot path to the reference inside the referencing item.
    pub path: String,
    /// Field on the referenced item the value matches; `None` means its key.
    pub target_field: Option<String>,
}

/// A field holding source code that is stored in a sibling file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeField {
    /// Field name inside the item.
    pub field: String,
    /// Accepted file extensions, the first one is the default.
    pub extensions: Vec<String>,
}

/// REST endpoint layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestEndpoints {
    /// Collection URI, used for list and create.
    pub collection: String,
    /// Item URI with an `{id}` placeholder, used for detail, update and delete.
    pub item: String,
    /// Query string selecting one key, with a `{key}` placeholder.
    pub key_filter: Option<String>,
    /// Field of the list response holding the items.
    pub items_field: String,
    /// Page size; `None` fetches a single page.
    pub page_size: Option<u32>,
    /// Fetch each listed item individually for its full body.
    pub detail_fetch: bool,
    /// Send updates with PUT instead of PATCH.
    pub update_with_put: bool,
}

impl RestEndpoints {
    /// Endpoints for a collection and its item URI.
    pub fn new(collection: impl Into<String>, item: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            item: item.into(),
            key_filter: None,
            items_field: "items".to_string(),
            page_size: Some(500),
            detail_fetch: false,
            update_with_put: false,
        }
    }

    /// The item URI for `id`.
    pub fn item_uri(&self, id: &str) -> String {
        self.item.replace("{id}", &mcsync_client::security::url::encode_param(id))
    }
}

/// Which operation a payload is prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFor {
    Create,
    Update,
}

/// Per-type static contract, shared by all items of the type.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    /// Type name, also the directory and file suffix (`<key>.<type>-meta.json`).
    pub type_name: String,
    /// Immutable external identifier.
    pub key_field: String,
    /// Server-assigned id.
    pub id_field: String,
    /// Display name, used as the rename fallback.
    pub name_field: String,
    pub fields: BTreeMap<String, FieldSpec>,
    /// Types whose items this type's items may reference.
    pub dependencies: Vec<String>,
    pub dependency_refs: Vec<DependencyRef>,
    pub api: ApiKind,
    /// SOAP object type name.
    pub soap_object: Option<String>,
    pub rest: Option<RestEndpoints>,
    pub code_fields: Vec<CodeField>,
    /// Force sequential creates even without a self-reference.
    pub sequential_create: bool,
    pub sequential_update: bool,
    pub supports_delete: bool,
}

impl TypeDefinition {
    /// Start a definition.
    pub fn builder(
        type_name: impl Into<String>,
        api: ApiKind,
        key_field: impl Into<String>,
    ) -> TypeDefinitionBuilder {
        let key_field = key_field.into();
        TypeDefinitionBuilder {
            def: TypeDefinition {
                type_name: type_name.into(),
                id_field: key_field.clone(),
                name_field: key_field.clone(),
                key_field,
                fields: BTreeMap::new(),
                dependencies: Vec::new(),
                dependency_refs: Vec::new(),
                api,
                soap_object: None,
                rest: None,
                code_fields: Vec::new(),
                sequential_create: false,
                sequential_update: false,
                supports_delete: false,
            },
        }
    }

    /// Creates run one at a time when explicitly flagged or when items of
    /// this type reference other items of the same type.
    pub fn creates_sequentially(&self) -> bool {
        self.sequential_create || self.dependencies.iter().any(|d| d == &self.type_name)
    }

    fn spec(&self, field: &str) -> Option<&FieldSpec> {
        self.fields.get(field)
    }

    /// Undeclared fields count as updatable so they are neither stripped
    /// nor diffed away silently.
    pub fn is_updatable(&self, field: &str) -> bool {
        self.spec(field).is_none_or(|s| s.update)
    }

    /// Declared and flagged updatable; the diff only looks at these.
    pub fn is_diffed(&self, field: &str) -> bool {
        self.spec(field).is_some_and(|s| s.update)
    }

    pub fn is_creatable(&self, field: &str) -> bool {
        self.spec(field).is_none_or(|s| s.create)
    }

    pub fn is_template_field(&self, field: &str) -> bool {
        self.spec(field).is_none_or(|s| s.template)
    }

    /// SOAP properties to request on retrieve.
    pub fn retrieve_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.retrieve)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Copy of `item` reduced to what the API accepts for `purpose`.
    ///
    /// Relation fields (`r__` prefix) are local-only and always dropped.
    pub fn payload(&self, item: &MetadataItem, purpose: PayloadFor) -> MetadataItem {
        item.iter()
            .filter(|(name, _)| !name.starts_with("r__"))
            .filter(|(name, _)| match purpose {
                PayloadFor::Create => self.is_creatable(name),
                PayloadFor::Update => self.is_updatable(name),
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Copy of `item` without fields excluded from templates.
    pub fn template_fields(&self, item: &MetadataItem) -> MetadataItem {
        item.iter()
            .filter(|(name, _)| self.is_template_field(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Dependency paths pointing at `metadata_type`.
    pub fn refs_to<'a>(&'a self, metadata_type: &'a str) -> impl Iterator<Item = &'a DependencyRef> {
        self.dependency_refs
            .iter()
            .filter(move |r| r.metadata_type == metadata_type)
    }
}

/// Builder for [`TypeDefinition`].
#[derive(Debug, Clone)]
pub struct TypeDefinitionBuilder {
    def: TypeDefinition,
}

impl TypeDefinitionBuilder {
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.def.id_field = field.into();
        self
    }

    pub fn name_field(mut self, field: impl Into<String>) -> Self {
        self.def.name_field = field.into();
        self
    }

    /// Declare a field.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.def.fields.insert(name.into(), spec);
        self
    }

    /// Declare a dependency on another type, found at `path`.
    pub fn depends_on(mut self, metadata_type: impl Into<String>, path: impl Into<String>) -> Self {
        self.push_ref(metadata_type.into(), path.into(), None);
        self
    }

    /// Declare a dependency whose reference matches `target_field` on the
    /// referenced item instead of its key.
    pub fn depends_on_field(
        mut self,
        metadata_type: impl Into<String>,
        path: impl Into<String>,
        target_field: impl Into<String>,
    ) -> Self {
        self.push_ref(metadata_type.into(), path.into(), Some(target_field.into()));
        self
    }

    fn push_ref(&mut self, metadata_type: String, path: String, target_field: Option<String>) {
        if !self.def.dependencies.contains(&metadata_type) {
            self.def.dependencies.push(metadata_type.clone());
        }
        self.def.dependency_refs.push(DependencyRef {
            metadata_type,
            path,
            target_field,
        });
    }

    pub fn soap_object(mut self, object: impl Into<String>) -> Self {
        self.def.soap_object = Some(object.into());
        self
    }

    pub fn rest(mut self, endpoints: RestEndpoints) -> Self {
        self.def.rest = Some(endpoints);
        self
    }

    /// Store `field` in a sibling code file.
    pub fn code_field(mut self, field: impl Into<String>, extensions: &[&str]) -> Self {
        self.def.code_fields.push(CodeField {
            field: field.into(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        });
        self
    }

    pub fn sequential_create(mut self, sequential: bool) -> Self {
        self.def.sequential_create = sequential;
        self
    }

    pub fn sequential_update(mut self, sequential: bool) -> Self {
        self.def.sequential_update = sequential;
        self
    }

    pub fn supports_delete(mut self, supported: bool) -> Self {
        self.def.supports_delete = supported;
        self
    }

    pub fn build(self) -> TypeDefinition {
        self.def
    }
}
