//! Retrieve, deploy and template pipelines.
//!
//! Every function takes the [`SyncContext`] explicitly and the adapter as a
//! `&dyn MetadataType`, so one engine serves all types:
//!
//! ```text
//! retrieve:   fetch ─▶ cache ─▶ post_retrieve ─▶ filter ─▶ save
//! upsert:     baseline ─▶ pre_deploy ─▶ classify ─▶ create / update ─▶ post_deploy
//! template:   retrieve tree ─▶ names  ─▶ template tree
//! definition: template tree ─▶ values ─▶ deploy tree
//! ```
//!
//! Item-level failures are logged and collected in the reports; only
//! failures that leave nothing to compare against (the baseline fetch, a
//! missing directory) abort a whole type.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::code::CodeFile;
use crate::concurrency::bounded;
use crate::config::SyncContext;
use crate::diff::{classify, UpsertAction};
use crate::error::{Error, ErrorKind, Result};
use crate::filter::RetrieveFilter;
use crate::item::{field_string, MetadataItem, MetadataTypeMap};
use crate::metadata_type::MetadataType;
use crate::registry::TypeRegistry;
use crate::store::Tree;
use crate::template::{
    apply_names_to_json, apply_template_names, apply_template_values, apply_values_to_json,
    template_error, TemplateMap,
};

/// One item that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub key: String,
    pub messages: Vec<String>,
}

impl ItemFailure {
    fn new(key: impl Into<String>, err: &Error) -> Self {
        Self {
            key: key.into(),
            messages: err.messages(),
        }
    }
}

/// Outcome of one upsert batch.
#[derive(Debug, Clone, Default)]
pub struct UpsertReport {
    pub metadata_type: String,
    pub created: MetadataTypeMap,
    pub updated: MetadataTypeMap,
    /// Keys found unchanged on the server.
    pub skipped: Vec<String>,
    pub failed: Vec<ItemFailure>,
    /// Messages of a failed `post_deploy_tasks` run.
    pub post_deploy_error: Option<Vec<String>>,
}

impl UpsertReport {
    fn new(metadata_type: &str) -> Self {
        Self {
            metadata_type: metadata_type.to_string(),
            ..Self::default()
        }
    }

    /// Number of items written to the server.
    pub fn deployed_count(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.failed.is_empty() || self.post_deploy_error.is_some()
    }

    /// Created and updated items together.
    pub fn deployed(&self) -> impl Iterator<Item = (&String, &MetadataItem)> {
        self.created.iter().chain(self.updated.iter())
    }
}

/// A type whose batch could not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeFailure {
    pub metadata_type: String,
    pub messages: Vec<String>,
}

/// Outcome of a multi-type deploy.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    /// Per-type reports, in deploy order.
    pub reports: Vec<UpsertReport>,
    pub fatal: Vec<TypeFailure>,
    /// Types not attempted because an earlier type failed and the run was
    /// configured to stop.
    pub not_attempted: Vec<String>,
}

impl DeployReport {
    /// Non-zero exit indicator.
    pub fn has_errors(&self) -> bool {
        !self.fatal.is_empty()
            || !self.not_attempted.is_empty()
            || self.reports.iter().any(UpsertReport::has_errors)
    }

    pub fn report(&self, metadata_type: &str) -> Option<&UpsertReport> {
        self.reports.iter().find(|r| r.metadata_type == metadata_type)
    }
}

/// Fetch remote items and merge them into the cache as they are, without
/// hooks or files. Used for baselines and cross-type references.
#[instrument(skip(ctx, mtype), fields(metadata_type = %mtype.name(), bu = %ctx.bu.name))]
pub async fn retrieve_for_cache(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    keys: Option<&[String]>,
) -> Result<MetadataTypeMap> {
    let items = mtype.retrieve(ctx, keys).await?;
    ctx.cache.merge_metadata(ctx.scope(), mtype.name(), items.clone());
    debug!(count = items.len(), "Cached");
    Ok(items)
}

/// Retrieve items, normalize them, apply `filter` and write the survivors
/// to the retrieve tree.
#[instrument(skip(ctx, mtype, filter), fields(metadata_type = %mtype.name(), bu = %ctx.bu.name))]
pub async fn retrieve(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    keys: Option<&[String]>,
    filter: &RetrieveFilter,
) -> Result<MetadataTypeMap> {
    let raw = retrieve_for_cache(ctx, mtype, keys).await?;
    let fetched = raw.len();

    let results = bounded(raw.into_iter().collect(), ctx.config.concurrency, |(key, item)| async move {
        let result = mtype.post_retrieve_tasks(ctx, item).await;
        (key, result)
    })
    .await;

    let mut items = MetadataTypeMap::new();
    for (key, result) in results {
        match result {
            Ok(item) if filter.matches(&item) => {
                items.insert(key, item);
            }
            Ok(_) => debug!(key = %key, "Filtered out"),
            Err(err) => warn!(
                key = %key,
                messages = ?err.messages(),
                "Post-retrieve failed, skipping"
            ),
        }
    }

    save_results(ctx, mtype, &items).await?;
    info!(fetched, saved = items.len(), "Retrieved");
    Ok(items)
}

/// Write retrieved items to the retrieve tree, code extracted and with
/// their doc page. Returns the JSON paths written. Items whose key cannot
/// be a file name are logged and left out.
pub async fn save_results(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    items: &MetadataTypeMap,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(items.len());
    for (key, item) in items {
        let extracted = mtype.extract_code(item)?;
        let doc = mtype.document(item);
        let written = ctx
            .store
            .write_item(Tree::Retrieve, &ctx.bu, mtype.name(), key, &extracted, doc.as_deref())
            .await;
        match written {
            Ok(path) => paths.push(path),
            Err(err) if matches!(err.kind, ErrorKind::InvalidItem { .. }) => {
                warn!(metadata_type = %mtype.name(), key = %key, error = %err, "Item not saved");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(paths)
}

/// Read items of one type from a local tree, code merged back in.
///
/// Items that cannot be read are returned as failures next to the map.
/// With `keys`, a key absent on disk is a failure too.
pub async fn read_local(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    tree: Tree,
    keys: Option<&[String]>,
    nested: bool,
) -> Result<(MetadataTypeMap, Vec<ItemFailure>)> {
    let keys = match keys {
        Some(keys) => keys.to_vec(),
        None => ctx.store.list_keys(tree, &ctx.bu, mtype.name()).await?,
    };

    let mut items = MetadataTypeMap::new();
    let mut failed = Vec::new();
    for key in keys {
        let stored = ctx
            .store
            .read_item(tree, &ctx.bu, mtype.definition(), &key, nested)
            .await;
        let merged = match stored {
            Ok(Some(stored)) => mtype.merge_code(&stored.json, &stored.code),
            Ok(None) => Err(missing_item(ctx, mtype, tree, &key)),
            Err(err) => Err(err),
        };
        match merged {
            Ok(item) => {
                items.insert(key, item);
            }
            Err(err) => {
                warn!(metadata_type = %mtype.name(), key = %key, error = %err, "Cannot read local item");
                failed.push(ItemFailure::new(key, &err));
            }
        }
    }
    Ok((items, failed))
}

fn missing_item(ctx: &SyncContext, mtype: &dyn MetadataType, tree: Tree, key: &str) -> Error {
    Error::new(ErrorKind::MissingFile {
        path: ctx
            .store
            .meta_path(tree, &ctx.bu, mtype.name(), key)
            .display()
            .to_string(),
    })
}

/// Find the baseline for a local item: by key, or by a unique name match
/// among remote items no local item claims by key.
fn find_baseline<'a>(
    mtype: &dyn MetadataType,
    baseline: &'a MetadataTypeMap,
    local_keys: &BTreeSet<String>,
    key: &str,
    item: &MetadataItem,
) -> Option<&'a MetadataItem> {
    if let Some(found) = baseline.get(key) {
        return Some(found);
    }
    let def = mtype.definition();
    if def.name_field == def.key_field {
        return None;
    }
    let name = field_string(item, &def.name_field)?;
    let mut matches = baseline
        .iter()
        .filter(|(k, _)| !local_keys.contains(*k))
        .filter(|(_, remote)| field_string(remote, &def.name_field).as_deref() == Some(name.as_str()));
    let (remote_key, found) = matches.next()?;
    if matches.next().is_some() {
        warn!(metadata_type = %def.type_name, key = %key, name = %name, "Name matches several remote items, treating as new");
        return None;
    }
    info!(metadata_type = %def.type_name, key = %key, remote_key = %remote_key, "Matched remote item by name");
    Some(found)
}

/// Carry the server id over so the update can address the item.
fn with_baseline_id(mtype: &dyn MetadataType, baseline: &MetadataItem, mut item: MetadataItem) -> MetadataItem {
    let id_field = &mtype.definition().id_field;
    if let Some(id) = baseline.get(id_field) {
        item.insert(id_field.clone(), id.clone());
    }
    item
}

async fn create_one(ctx: &SyncContext, mtype: &dyn MetadataType, key: String, item: MetadataItem) -> (String, Result<MetadataItem>) {
    let result = match mtype.create(ctx, &item).await {
        Ok(created) => mtype.post_create_tasks(ctx, created).await,
        Err(err) => Err(err),
    };
    (key, result)
}

async fn update_one(ctx: &SyncContext, mtype: &dyn MetadataType, key: String, item: MetadataItem) -> (String, Result<MetadataItem>) {
    let result = match mtype.update(ctx, &item).await {
        Ok(updated) => mtype.post_update_tasks(ctx, updated).await,
        Err(err) => Err(err),
    };
    (key, result)
}

fn record(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    action: UpsertAction,
    report: &mut UpsertReport,
    (key, result): (String, Result<MetadataItem>),
) {
    match result {
        Ok(item) => {
            let mut single = MetadataTypeMap::new();
            single.insert(key.clone(), item.clone());
            ctx.cache.merge_metadata(ctx.scope(), mtype.name(), single);
            match action {
                UpsertAction::Create => {
                    info!(metadata_type = %mtype.name(), key = %key, "Created");
                    report.created.insert(key, item);
                }
                _ => {
                    info!(metadata_type = %mtype.name(), key = %key, "Updated");
                    report.updated.insert(key, item);
                }
            }
        }
        Err(err) => {
            warn!(
                metadata_type = %mtype.name(),
                key = %key,
                action = ?action,
                messages = ?err.messages(),
                "Deploy failed"
            );
            report.failed.push(ItemFailure::new(key, &err));
        }
    }
}

/// What to do with a prepared item.
enum Planned {
    Create(MetadataItem),
    Update(MetadataItem),
}

/// Classify one prepared item against the baseline. Failures and
/// unchanged items go straight into the report.
fn plan(
    mtype: &dyn MetadataType,
    baseline: &MetadataTypeMap,
    local_keys: &BTreeSet<String>,
    report: &mut UpsertReport,
    key: &str,
    prepared: Result<MetadataItem>,
) -> Option<Planned> {
    let item = match prepared {
        Ok(item) => item,
        Err(err) => {
            warn!(key = %key, messages = ?err.messages(), "Pre-deploy failed");
            report.failed.push(ItemFailure::new(key, &err));
            return None;
        }
    };
    let remote = find_baseline(mtype, baseline, local_keys, key, &item);
    let changed = remote.map(|r| mtype.changed_fields(r, &item)).unwrap_or_default();
    let diff = classify(remote, changed);
    match (diff.action, remote) {
        (UpsertAction::Create, _) => Some(Planned::Create(item)),
        (UpsertAction::Update, Some(remote)) => {
            debug!(key = %key, changed = ?diff.changed, "Changed");
            Some(Planned::Update(with_baseline_id(mtype, remote, item)))
        }
        _ => {
            debug!(key = %key, "Unchanged");
            report.skipped.push(key.to_string());
            None
        }
    }
}

/// Create or update local items against a fresh server baseline.
///
/// Unchanged items are skipped without an API call. When the type
/// references itself, items are prepared and created one at a time in
/// creation order, each cached before the next is prepared, so a child can
/// resolve a parent created in the same batch.
#[instrument(skip(ctx, mtype, local), fields(metadata_type = %mtype.name(), bu = %ctx.bu.name, count = local.len()))]
pub async fn upsert(ctx: &SyncContext, mtype: &dyn MetadataType, local: MetadataTypeMap) -> Result<UpsertReport> {
    let def = mtype.definition();
    let mut report = UpsertReport::new(&def.type_name);
    if local.is_empty() {
        return Ok(report);
    }

    let baseline = retrieve_for_cache(ctx, mtype, None).await?;
    let local_keys: BTreeSet<String> = local.keys().cloned().collect();
    let mut pending: Vec<(String, MetadataItem)> = local.into_iter().collect();
    let mut updates = Vec::new();

    if def.creates_sequentially() {
        mtype.order_creates(&mut pending);
        for (key, item) in pending {
            let prepared = mtype.pre_deploy_tasks(ctx, item).await;
            match plan(mtype, &baseline, &local_keys, &mut report, &key, prepared) {
                Some(Planned::Create(item)) => {
                    let outcome = create_one(ctx, mtype, key, item).await;
                    record(ctx, mtype, UpsertAction::Create, &mut report, outcome);
                }
                Some(Planned::Update(item)) => updates.push((key, item)),
                None => {}
            }
        }
    } else {
        let prepared = bounded(pending, ctx.config.concurrency, |(key, item)| async move {
            let result = mtype.pre_deploy_tasks(ctx, item).await;
            (key, result)
        })
        .await;

        let mut creates = Vec::new();
        for (key, result) in prepared {
            match plan(mtype, &baseline, &local_keys, &mut report, &key, result) {
                Some(Planned::Create(item)) => creates.push((key, item)),
                Some(Planned::Update(item)) => updates.push((key, item)),
                None => {}
            }
        }
        let outcomes = bounded(creates, ctx.config.concurrency, |(key, item)| create_one(ctx, mtype, key, item)).await;
        for outcome in outcomes {
            record(ctx, mtype, UpsertAction::Create, &mut report, outcome);
        }
    }
    report.skipped.sort();

    let update_limit = if def.sequential_update { Some(1) } else { ctx.config.concurrency };
    let outcomes = bounded(updates, update_limit, |(key, item)| update_one(ctx, mtype, key, item)).await;
    for outcome in outcomes {
        record(ctx, mtype, UpsertAction::Update, &mut report, outcome);
    }

    if let Err(err) = mtype.post_deploy_tasks(ctx, &report).await {
        warn!(messages = ?err.messages(), "Post-deploy tasks failed");
        report.post_deploy_error = Some(err.messages());
    }

    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Upsert finished"
    );
    Ok(report)
}

/// Deploy the deploy tree for `types`, dependencies first.
///
/// Referenced types missing from the cache are retrieved into it before
/// their dependents are prepared. A type whose batch fails as a whole is
/// recorded and, with `continue_on_error`, the run moves on.
#[instrument(skip(ctx, registry), fields(bu = %ctx.bu.name))]
pub async fn deploy(ctx: &SyncContext, registry: &TypeRegistry, types: &[String]) -> Result<DeployReport> {
    let order = registry.deploy_order(types)?;
    let mut report = DeployReport::default();

    for (position, name) in order.iter().enumerate() {
        let mtype = registry.require(name)?;
        match deploy_type(ctx, registry, mtype.as_ref()).await {
            Ok(upsert_report) => report.reports.push(upsert_report),
            Err(err) => {
                warn!(metadata_type = %name, messages = ?err.messages(), "Deploy of type failed");
                report.fatal.push(TypeFailure {
                    metadata_type: name.clone(),
                    messages: err.messages(),
                });
                if !ctx.config.continue_on_error {
                    report.not_attempted = order[position + 1..].to_vec();
                    break;
                }
            }
        }
    }
    Ok(report)
}

async fn deploy_type(ctx: &SyncContext, registry: &TypeRegistry, mtype: &dyn MetadataType) -> Result<UpsertReport> {
    let (local, failed) = read_local(ctx, mtype, Tree::Deploy, None, false).await?;
    if local.is_empty() && failed.is_empty() {
        info!(metadata_type = %mtype.name(), "Nothing to deploy");
    }

    for dep in &mtype.definition().dependencies {
        if dep == mtype.name() || ctx.cache.has_type(ctx.scope(), dep) {
            continue;
        }
        let Some(dep_type) = registry.get(dep) else {
            continue;
        };
        if let Err(err) = retrieve_for_cache(ctx, dep_type.as_ref(), None).await {
            warn!(
                metadata_type = %mtype.name(),
                dependency = %dep,
                messages = ?err.messages(),
                "Could not cache dependency, references to it will not resolve"
            );
        }
    }

    let mut report = upsert(ctx, mtype, local).await?;
    report.failed.extend(failed);
    Ok(report)
}

/// Substitute a market into an item and its code files, each error naming
/// the file it came from. `to_names` turns values into placeholders.
fn substitute(
    metadata_type: &str,
    json: &MetadataItem,
    json_path: &Path,
    code: &[CodeFile],
    code_dir: &Path,
    market: &TemplateMap,
    to_names: bool,
) -> Result<(MetadataItem, Vec<CodeFile>)> {
    let value = Value::Object(json.clone());
    let value = if to_names {
        apply_names_to_json(&value, market)
    } else {
        apply_values_to_json(&value, market)
    }
    .map_err(|e| template_error(metadata_type, json_path, e))?;
    let Value::Object(json) = value else {
        return Err(Error::invalid_item(
            metadata_type,
            json_path.display().to_string(),
            "not a JSON object",
        ));
    };

    let mut files = Vec::with_capacity(code.len());
    for file in code {
        let content = if to_names {
            apply_template_names(&file.content, market)
        } else {
            apply_template_values(&file.content, market)
        }
        .map_err(|e| template_error(metadata_type, code_dir.join(file.relative_path()), e))?;
        files.push(CodeFile {
            content,
            ..file.clone()
        });
    }
    Ok((json, files))
}

fn templated_key(mtype: &dyn MetadataType, item: &MetadataItem, fallback: &str) -> String {
    field_string(item, &mtype.definition().key_field).unwrap_or_else(|| fallback.to_string())
}

async fn template_from(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    key: &str,
    market: &TemplateMap,
    nested: bool,
) -> Result<PathBuf> {
    let stored = ctx
        .store
        .read_item(Tree::Retrieve, &ctx.bu, mtype.definition(), key, nested)
        .await?
        .ok_or_else(|| missing_item(ctx, mtype, Tree::Retrieve, key))?;

    let item = mtype.merge_code(&stored.json, &stored.code)?;
    let item = mtype.definition().template_fields(&item);
    write_template(ctx, mtype, key, &item, &stored.path, market).await
}

async fn write_template(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    key: &str,
    item: &MetadataItem,
    source: &Path,
    market: &TemplateMap,
) -> Result<PathBuf> {
    // Substituting before extraction templates the code body with the JSON.
    let (item, _) = substitute(mtype.name(), item, source, &[], Path::new(""), market, true)?;
    let extracted = mtype.extract_code(&item)?;
    let template_key = templated_key(mtype, &item, key);
    ctx.store
        .write_item(Tree::Template, &ctx.bu, mtype.name(), &template_key, &extracted, None)
        .await
}

/// Turn a retrieved item into a template: drop environment-specific fields,
/// replace market values with `{{{name}}}` placeholders and write it to the
/// template tree. The key may itself be templated.
#[instrument(skip(ctx, mtype, market), fields(metadata_type = %mtype.name()))]
pub async fn build_template(ctx: &SyncContext, mtype: &dyn MetadataType, key: &str, market: &TemplateMap) -> Result<PathBuf> {
    template_from(ctx, mtype, key, market, false).await
}

/// [`build_template`] for items stored in a `<type>/<key>/` folder.
pub async fn build_template_for_nested(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    key: &str,
    market: &TemplateMap,
) -> Result<PathBuf> {
    template_from(ctx, mtype, key, market, true).await
}

async fn definition_from(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    template_key: &str,
    market: &TemplateMap,
    nested: bool,
) -> Result<PathBuf> {
    let stored = ctx
        .store
        .read_item(Tree::Template, &ctx.bu, mtype.definition(), template_key, nested)
        .await?
        .ok_or_else(|| missing_item(ctx, mtype, Tree::Template, template_key))?;

    let code_dir = stored.path.parent().unwrap_or(Path::new(""));
    let (json, code) = substitute(mtype.name(), &stored.json, &stored.path, &stored.code, code_dir, market, false)?;
    let item = mtype.merge_code(&json, &code)?;
    let extracted = mtype.extract_code(&item)?;
    let key = templated_key(mtype, &extracted.json, template_key);
    ctx.store
        .write_item(Tree::Deploy, &ctx.bu, mtype.name(), &key, &extracted, None)
        .await
}

/// Resolve a template with a market's values and write the deployable
/// definition to the deploy tree.
#[instrument(skip(ctx, mtype, market), fields(metadata_type = %mtype.name()))]
pub async fn build_definition(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    template_key: &str,
    market: &TemplateMap,
) -> Result<PathBuf> {
    definition_from(ctx, mtype, template_key, market, false).await
}

/// [`build_definition`] for templates stored in a `<type>/<key>/` folder.
pub async fn build_definition_for_nested(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    template_key: &str,
    market: &TemplateMap,
) -> Result<PathBuf> {
    definition_from(ctx, mtype, template_key, market, true).await
}

/// Fetch one item and write it straight to the template tree.
#[instrument(skip(ctx, mtype, market), fields(metadata_type = %mtype.name()))]
pub async fn retrieve_as_template(
    ctx: &SyncContext,
    mtype: &dyn MetadataType,
    key: &str,
    market: &TemplateMap,
) -> Result<PathBuf> {
    let keys = [key.to_string()];
    let mut found = retrieve_for_cache(ctx, mtype, Some(&keys)).await?;
    let item = found
        .remove(key)
        .ok_or_else(|| Error::invalid_item(mtype.name(), key, "not found on server"))?;
    let item = mtype.post_retrieve_tasks(ctx, item).await?;
    let item = mtype.definition().template_fields(&item);
    let source = ctx.store.meta_path(Tree::Retrieve, &ctx.bu, mtype.name(), key);
    write_template(ctx, mtype, key, &item, &source, market).await
}

/// Delete an item on the server, then its local retrieve files.
#[instrument(skip(ctx, mtype), fields(metadata_type = %mtype.name(), bu = %ctx.bu.name))]
pub async fn delete_by_key(ctx: &SyncContext, mtype: &dyn MetadataType, key: &str) -> Result<usize> {
    mtype.delete_by_key(ctx, key).await?;
    let removed = ctx
        .store
        .remove_item(Tree::Retrieve, &ctx.bu, mtype.definition(), key)
        .await?;
    info!(key = %key, files = removed, "Deleted");
    Ok(removed)
}

/// Group failures by key for display.
pub fn failures_by_key(failed: &[ItemFailure]) -> BTreeMap<&str, &[String]> {
    failed
        .iter()
        .map(|f| (f.key.as_str(), f.messages.as_slice()))
        .collect()
}
