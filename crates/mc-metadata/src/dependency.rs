//! Transitive closure of the items a deploy needs.
//!
//! Starting from requested type/key pairs, each item found in the retrieve
//! tree is asked for the keys it references per dependency type. New pairs
//! are queued until nothing new turns up. Each pair is visited once, so
//! reference cycles terminate.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, info, instrument, warn};

use crate::config::SyncContext;
use crate::error::Result;
use crate::item::{combo_insert, field_string, MetadataTypeMap, TypeKeyCombo};
use crate::metadata_type::MetadataType;
use crate::pipeline::read_local;
use crate::registry::TypeRegistry;
use crate::store::Tree;

/// Result of a dependency walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    /// Requested pairs plus everything they pull in.
    pub combo: TypeKeyCombo,
    /// Pairs pulled in that were not requested.
    pub added: TypeKeyCombo,
    /// Referenced values with no local item to back them.
    pub missing: TypeKeyCombo,
}

impl DependencyClosure {
    pub fn has_missing(&self) -> bool {
        self.missing.values().any(|keys| !keys.is_empty())
    }
}

/// Local items per type, loaded once.
struct LocalItems<'a> {
    ctx: &'a SyncContext,
    loaded: HashMap<String, MetadataTypeMap>,
}

impl<'a> LocalItems<'a> {
    fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            loaded: HashMap::new(),
        }
    }

    async fn of(&mut self, mtype: &dyn MetadataType) -> Result<&MetadataTypeMap> {
        let name = mtype.name();
        if !self.loaded.contains_key(name) {
            let (items, failed) = read_local(self.ctx, mtype, Tree::Retrieve, None, false).await?;
            if !failed.is_empty() {
                warn!(metadata_type = %name, count = failed.len(), "Some local items could not be read");
            }
            self.loaded.insert(name.to_string(), items);
        }
        Ok(&self.loaded[name])
    }
}

/// Resolve a referenced value to the key of a local item of `dep_type`.
fn resolve_reference(
    referencing: &dyn MetadataType,
    dep_type: &str,
    value: &str,
    candidates: &MetadataTypeMap,
) -> Option<String> {
    let target = referencing
        .definition()
        .refs_to(dep_type)
        .find_map(|r| r.target_field.as_deref());
    match target {
        None => candidates.contains_key(value).then(|| value.to_string()),
        Some(field) => candidates
            .iter()
            .find(|(_, item)| field_string(item, field).as_deref() == Some(value))
            .map(|(key, _)| key.clone()),
    }
}

/// Compute everything `requested` depends on, transitively.
///
/// An empty key set for a requested type stands for all of its local items.
/// Dependency types with no registered adapter are not followed.
#[instrument(skip_all, fields(bu = %ctx.bu.name))]
pub async fn resolve_dependencies(
    ctx: &SyncContext,
    registry: &TypeRegistry,
    requested: &TypeKeyCombo,
) -> Result<DependencyClosure> {
    let mut closure = DependencyClosure::default();
    let mut local = LocalItems::new(ctx);
    let mut queue = VecDeque::new();

    for (type_name, keys) in requested {
        let mtype = registry.require(type_name)?;
        let keys: Vec<String> = if keys.is_empty() {
            local.of(mtype.as_ref()).await?.keys().cloned().collect()
        } else {
            keys.iter().cloned().collect()
        };
        for key in keys {
            if combo_insert(&mut closure.combo, type_name, &key) {
                queue.push_back((type_name.clone(), key));
            }
        }
    }

    while let Some((type_name, key)) = queue.pop_front() {
        let mtype = registry.require(&type_name)?;
        let Some(item) = local.of(mtype.as_ref()).await?.get(&key).cloned() else {
            debug!(metadata_type = %type_name, key = %key, "Not found locally");
            combo_insert(&mut closure.missing, &type_name, &key);
            continue;
        };

        for dep_type in &mtype.definition().dependencies {
            let Some(dep) = registry.get(dep_type) else {
                continue;
            };
            let values = mtype.get_nested_value(&item, dep_type);
            if values.is_empty() {
                continue;
            }
            let candidates = local.of(dep.as_ref()).await?;
            for value in values {
                let Some(dep_key) = resolve_reference(mtype.as_ref(), dep_type, &value, candidates) else {
                    warn!(
                        metadata_type = %type_name,
                        key = %key,
                        dependency = %dep_type,
                        value = %value,
                        "Referenced item not found locally"
                    );
                    combo_insert(&mut closure.missing, dep_type, &value);
                    continue;
                };
                if combo_insert(&mut closure.combo, dep_type, &dep_key) {
                    info!(
                        metadata_type = %dep_type,
                        key = %dep_key,
                        required_by = %format!("{type_name}/{key}"),
                        "Dependency pulled in"
                    );
                    combo_insert(&mut closure.added, dep_type, &dep_key);
                    queue.push_back((dep_type.clone(), dep_key));
                }
            }
        }
    }

    Ok(closure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{ApiKind, TypeDefinition};
    use serde_json::json;

    struct Refs(TypeDefinition);

    #[async_trait::async_trait]
    impl MetadataType for Refs {
        fn definition(&self) -> &TypeDefinition {
            &self.0
        }
    }

    #[test]
    fn test_resolve_by_key_or_target_field() {
        let by_path = Refs(
            TypeDefinition::builder("query", ApiKind::Rest, "key")
                .depends_on_field("folder", "r__folder_Path", "Path")
                .depends_on("dataExtension", "targetKey")
                .build(),
        );

        let mut folders = MetadataTypeMap::new();
        folders.insert(
            "f1".into(),
            json!({"CustomerKey": "f1", "Path": "Query/Shared"}).as_object().unwrap().clone(),
        );
        assert_eq!(
            resolve_reference(&by_path, "folder", "Query/Shared", &folders),
            Some("f1".to_string())
        );
        assert_eq!(resolve_reference(&by_path, "folder", "Query/Other", &folders), None);

        let mut des = MetadataTypeMap::new();
        des.insert("de1".into(), serde_json::Map::new());
        assert_eq!(
            resolve_reference(&by_path, "dataExtension", "de1", &des),
            Some("de1".to_string())
        );
        assert_eq!(resolve_reference(&by_path, "dataExtension", "de2", &des), None);
    }
}
