//! The `Drive` handle: backend, cache, root scope and settings.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::api::{DriveClient, NodeStore};
use crate::auth::Token;
use crate::config::{DriveConfig, RootSelector, WriteBufferKind};
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::cache::NodeCache;
use crate::fs::path::join_path;
use crate::fs::root::RootScope;
use crate::fs::write_buffer::WriteSettings;
use crate::fs::Node;

struct DriveInner {
    store: Arc<dyn NodeStore>,
    cache: NodeCache,
    root: RootScope,
    config: RwLock<DriveConfig>,
}

/// Path-addressed view over a Drive node graph.
///
/// Cloning is cheap; clones share the cache, the root scope and the
/// settings.
#[derive(Clone)]
pub struct Drive {
    inner: Arc<DriveInner>,
}

impl fmt::Debug for Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drive")
            .field("root", &self.inner.root.id())
            .field("config", &*self.inner.config.read())
            .finish()
    }
}

impl Drive {
    /// Connect to Google Drive with an OAuth token.
    pub async fn from_token(token: Token, config: DriveConfig) -> Result<Self> {
        Self::new(DriveClient::from_token(token), config).await
    }

    /// Build a drive over any backend.
    pub async fn new<S: NodeStore>(store: S, config: DriveConfig) -> Result<Self> {
        Self::with_store(Arc::new(store), config).await
    }

    /// Build a drive over a shared backend, applying the configured root.
    pub async fn with_store(store: Arc<dyn NodeStore>, config: DriveConfig) -> Result<Self> {
        let top = store.top().await.context("get", "root")?;
        let selector = config.root.clone();

        let drive = Self {
            inner: Arc::new(DriveInner {
                store,
                cache: NodeCache::new(),
                root: RootScope::new(top),
                config: RwLock::new(config),
            }),
        };

        match selector {
            None => {}
            Some(RootSelector::Path(path)) => {
                drive.set_root_directory(&path).await?;
            }
            Some(RootSelector::Id(id)) => {
                drive.set_root_node(&id).await?;
            }
        }

        info!(root = %drive.inner.root.id(), "drive ready");
        Ok(drive)
    }

    /// Snapshot of the current settings.
    pub fn config(&self) -> DriveConfig {
        self.inner.config.read().clone()
    }

    /// Change the write strategy for handles opened from now on.
    pub fn set_write_buffer(&self, kind: WriteBufferKind, size: usize) {
        let mut config = self.inner.config.write();
        config.write_buffer = kind;
        config.write_buffer_size = size;
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.inner.config.write().queue_depth = depth;
    }

    /// Make `remove` move nodes to the trash instead of deleting them.
    pub fn set_trash_for_delete(&self, enabled: bool) {
        self.inner.config.write().trash_for_delete = enabled;
    }

    /// The node paths are currently resolved from.
    pub fn root(&self) -> Node {
        self.inner.root.current()
    }

    /// The backend this drive talks to.
    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.inner.store
    }

    pub(crate) fn cache(&self) -> &NodeCache {
        &self.inner.cache
    }

    pub(crate) fn root_scope(&self) -> &RootScope {
        &self.inner.root
    }

    pub(crate) fn write_settings(&self) -> WriteSettings {
        let config = self.inner.config.read();
        WriteSettings {
            kind: config.write_buffer,
            buffer_size: config.write_buffer_size,
            queue_depth: config.queue_depth,
        }
    }

    pub(crate) fn trash_for_delete(&self) -> bool {
        self.inner.config.read().trash_for_delete
    }

    /// Resolve a normalized path from the current root.
    pub(crate) async fn resolve(&self, path: &str) -> Result<Node> {
        let root = self.inner.root.current();
        self.resolve_from(&root, path).await
    }

    /// Resolve a normalized path from `base`, one segment at a time.
    ///
    /// A missing segment fails with the first missing prefix; a file in
    /// an intermediate position fails naming that file.
    pub(crate) async fn resolve_from(&self, base: &Node, path: &str) -> Result<Node> {
        if path.is_empty() {
            return Ok(base.clone());
        }
        if let Some(node) = self.inner.cache.get(&base.id, path) {
            return Ok(node);
        }

        let mut current = base.clone();
        let mut walked = String::new();
        for segment in path.split('/') {
            if !current.is_dir() {
                return Err(DriveError::not_a_directory(walked));
            }
            let next = join_path(&walked, segment);
            current = self
                .lookup_child(base, &current, &next, segment)
                .await?
                .ok_or_else(|| DriveError::not_exist(next.as_str()))?;
            walked = next;
        }
        Ok(current)
    }

    /// Look up one child, caching hits under `base`.
    pub(crate) async fn lookup_child(
        &self,
        base: &Node,
        parent: &Node,
        path: &str,
        name: &str,
    ) -> Result<Option<Node>> {
        if let Some(node) = self.inner.cache.get(&base.id, path) {
            return Ok(Some(node));
        }
        let found = self
            .inner
            .store
            .find_child(&parent.id, name)
            .await
            .context("stat", path)?;
        if let Some(node) = &found {
            self.inner.cache.insert(&base.id, path, node.clone());
        }
        Ok(found)
    }
}
