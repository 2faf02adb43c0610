//! Type name to adapter lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, ErrorKind, Result};
use crate::metadata_type::MetadataType;
use crate::types::{DataExtension, Folder, Query, Script};

/// Registered metadata types, keyed by type name.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, Arc<dyn MetadataType>>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled adapter.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Folder::new()));
        registry.register(Arc::new(DataExtension::new()));
        registry.register(Arc::new(Query::new()));
        registry.register(Arc::new(Script::new()));
        registry
    }

    /// Add or replace an adapter under its type name.
    pub fn register(&mut self, mtype: Arc<dyn MetadataType>) {
        self.types.insert(mtype.name().to_string(), mtype);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn MetadataType>> {
        self.types.get(name)
    }

    /// Like [`get`](Self::get), failing with `UnknownType`.
    pub fn require(&self, name: &str) -> Result<&Arc<dyn MetadataType>> {
        self.get(name)
            .ok_or_else(|| Error::new(ErrorKind::UnknownType(name.to_string())))
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Order `types` so every type comes after the requested types it
    /// depends on. Self-references are ignored; types caught in a cycle are
    /// appended by name with a warning.
    pub fn deploy_order(&self, types: &[String]) -> Result<Vec<String>> {
        let requested: BTreeSet<&str> = types.iter().map(String::as_str).collect();
        let mut pending: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &name in &requested {
            let deps = self
                .require(name)?
                .definition()
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| *d != name && requested.contains(d))
                .collect();
            pending.insert(name, deps);
        }

        let mut order = Vec::with_capacity(pending.len());
        loop {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                pending.remove(name);
                for deps in pending.values_mut() {
                    deps.remove(name);
                }
                order.push(name.to_string());
            }
        }

        if !pending.is_empty() {
            let cycle: Vec<&str> = pending.keys().copied().collect();
            warn!(types = ?cycle, "Dependency cycle between types, deploying in name order");
            order.extend(cycle.into_iter().map(str::to_string));
        }
        Ok(order)
    }
}
