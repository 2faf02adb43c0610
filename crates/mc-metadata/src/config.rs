//! Engine configuration and the per-run context.

use std::path::PathBuf;
use std::sync::Arc;

use mcsync_auth::BusinessUnit;
use mcsync_client::Transport;

use crate::cache::MetadataCache;
use crate::error::Result;
use crate::store::FileStore;

/// Configuration for synchronization runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the retrieve tree.
    pub retrieve_dir: PathBuf,
    /// Root of the deploy tree.
    pub deploy_dir: PathBuf,
    /// Root of the template tree.
    pub template_dir: PathBuf,
    /// Maximum in-flight requests per fan-out. `None` means unbounded.
    pub concurrency: Option<usize>,
    /// Keep going with the next type after a type fails as a whole.
    pub continue_on_error: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retrieve_dir: PathBuf::from("retrieve"),
            deploy_dir: PathBuf::from("deploy"),
            template_dir: PathBuf::from("template"),
            concurrency: None,
            continue_on_error: true,
        }
    }
}

impl SyncConfig {
    /// Create a new sync config builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// A config with all three trees below `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            retrieve_dir: root.join("retrieve"),
            deploy_dir: root.join("deploy"),
            template_dir: root.join("template"),
            ..Self::default()
        }
    }

    /// The file store for these roots.
    pub fn store(&self) -> FileStore {
        FileStore::new(&self.retrieve_dir, &self.deploy_dir, &self.template_dir)
    }
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    /// Put all three trees below `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let rooted = SyncConfig::rooted(root);
        self.config.retrieve_dir = rooted.retrieve_dir;
        self.config.deploy_dir = rooted.deploy_dir;
        self.config.template_dir = rooted.template_dir;
        self
    }

    pub fn with_retrieve_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.retrieve_dir = dir.into();
        self
    }

    pub fn with_deploy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.deploy_dir = dir.into();
        self
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.template_dir = dir.into();
        self
    }

    /// Bound concurrent requests; zero is treated as one.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.config.concurrency = Some(limit.max(1));
        self
    }

    pub fn with_continue_on_error(mut self, keep_going: bool) -> Self {
        self.config.continue_on_error = keep_going;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

/// Everything a pipeline call needs, passed explicitly.
#[derive(Clone)]
pub struct SyncContext {
    pub transport: Arc<dyn Transport>,
    pub cache: Arc<MetadataCache>,
    pub bu: BusinessUnit,
    pub store: FileStore,
    pub config: SyncConfig,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("bu", &self.bu)
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Context with a fresh cache initialized for `bu`.
    pub fn new(transport: Arc<dyn Transport>, bu: BusinessUnit, config: SyncConfig) -> Result<Self> {
        Self::with_cache(transport, Arc::new(MetadataCache::new()), bu, config)
    }

    /// Context sharing `cache` with other business units of the same run.
    pub fn with_cache(
        transport: Arc<dyn Transport>,
        cache: Arc<MetadataCache>,
        bu: BusinessUnit,
        config: SyncConfig,
    ) -> Result<Self> {
        cache.init(&bu)?;
        Ok(Self {
            transport,
            cache,
            store: config.store(),
            bu,
            config,
        })
    }

    /// Cache scope of this business unit.
    pub fn scope(&self) -> &str {
        &self.bu.mid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsync_client::mock::MockTransport;

    #[test]
    fn test_builder() {
        let config = SyncConfig::builder()
            .with_root("/tmp/project")
            .with_template_dir("/tmp/templates")
            .with_concurrency(0)
            .with_continue_on_error(false)
            .build();

        assert_eq!(config.retrieve_dir, PathBuf::from("/tmp/project/retrieve"));
        assert_eq!(config.template_dir, PathBuf::from("/tmp/templates"));
        assert_eq!(config.concurrency, Some(1));
        assert!(!config.continue_on_error);
    }

    #[test]
    fn test_context_initializes_cache() {
        let ctx = SyncContext::new(
            Arc::new(MockTransport::new()),
            BusinessUnit::new("cred", "Child", "200", "100"),
            SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(ctx.scope(), "200");

        let err = SyncContext::new(
            Arc::new(MockTransport::new()),
            BusinessUnit::new("cred", "Broken", "", "100"),
            SyncConfig::default(),
        );
        assert!(err.is_err());
    }
}
