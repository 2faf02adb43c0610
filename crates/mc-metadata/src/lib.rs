//! # mcsync-metadata
//!
//! Synchronization engine for Marketing Cloud metadata.
//!
//! This crate provides:
//! - A per-business-unit [`MetadataCache`] for cross-type reference lookups
//! - Code extraction of embedded SQL/SSJS/HTML into sibling files
//! - The `{{{name}}}` [template engine](template) in both directions
//! - A [dependency resolver](dependency) computing deploy closures
//! - The [retrieve/deploy pipeline](pipeline) with create/update/skip diffing
//! - The [`MetadataType`] trait and bundled [adapters](types)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 pipeline / dependency                       │
//! │   retrieve, upsert, deploy, build_template, closures        │
//! └─────────────────────────────────────────────────────────────┘
//!               │                               │
//!               ▼                               ▼
//! ┌──────────────────────────────┐ ┌────────────────────────────┐
//! │   dyn MetadataType           │ │  SyncContext               │
//! │   folder, dataExtension,     │ │  transport, cache, bu,     │
//! │   query, script              │ │  file store, config        │
//! └──────────────────────────────┘ └────────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        generic REST / SOAP operations over `Transport`      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mcsync_auth::BusinessUnit;
//! use mcsync_metadata::{pipeline, RetrieveFilter, SyncConfig, SyncContext, TypeRegistry};
//!
//! # async fn example(transport: Arc<dyn mcsync_client::Transport>) -> mcsync_metadata::Result<()> {
//! let bu = BusinessUnit::new("default", "Marketing", "100200", "100000");
//! let ctx = SyncContext::new(transport, bu, SyncConfig::rooted("."))?;
//! let registry = TypeRegistry::standard();
//!
//! let query = registry.require("query")?;
//! let items = pipeline::retrieve(&ctx, query.as_ref(), None, &RetrieveFilter::new()).await?;
//! println!("retrieved {} queries", items.len());
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod code;
mod concurrency;
mod config;
pub mod definition;
pub mod dependency;
pub mod diff;
mod error;
mod filter;
mod item;
mod metadata_type;
pub mod path;
pub mod pipeline;
mod registry;
pub mod rest;
pub mod soap;
mod store;
pub mod template;
pub mod types;

pub use cache::{LookupError, MetadataCache, FOLDER_ID_FIELD, FOLDER_PATH_FIELD, FOLDER_TYPE, LIST_TYPE};
pub use code::{CodeFile, Extracted};
pub use config::{SyncConfig, SyncConfigBuilder, SyncContext};
pub use definition::{ApiKind, FieldSpec, PayloadFor, RestEndpoints, TypeDefinition};
pub use dependency::{resolve_dependencies, DependencyClosure};
pub use diff::{DiffResult, UpsertAction};
pub use error::{Error, ErrorKind, Result};
pub use filter::{FilterRule, RetrieveFilter, FOLDER_RELATION_FIELD};
pub use item::{combo_contains, combo_insert, MetadataItem, MetadataTypeMap, TypeKeyCombo};
pub use metadata_type::MetadataType;
pub use pipeline::{DeployReport, ItemFailure, TypeFailure, UpsertReport};
pub use registry::TypeRegistry;
pub use store::{FileStore, StoredItem, Tree};
pub use template::{TemplateError, TemplateMap};
