//! Directory tree mutations: mkdir, rename, remove and metadata updates.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

use crate::api::NodePatch;
use crate::drive::Drive;
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::node::{Node, NodeKind};
use crate::fs::path::{is_within, join_path, normalize_path, split_path};

impl Drive {
    /// Create `path` and any missing parents.
    ///
    /// Existing directories along the way are reused. Fails naming the
    /// first segment that is a file.
    #[instrument(skip(self), level = "debug")]
    pub async fn mkdir_all(&self, path: &str, _mode: u32) -> Result<Node> {
        let path = normalize_path(path);
        let root = self.root_scope().current();

        let mut current = root.clone();
        let mut walked = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.is_dir() {
                return Err(DriveError::not_a_directory(walked));
            }
            let next = join_path(&walked, segment);
            current = match self.lookup_child(&root, &current, &next, segment).await? {
                Some(node) => node,
                None => self.create_child(&root, &current, &next, segment, NodeKind::Directory).await?,
            };
            walked = next;
        }

        if !current.is_dir() {
            return Err(DriveError::not_a_directory(walked));
        }
        Ok(current)
    }

    /// Create the single directory `path`; its parent must exist.
    #[instrument(skip(self), level = "debug")]
    pub async fn mkdir(&self, path: &str, _mode: u32) -> Result<Node> {
        let path = normalize_path(path);
        let root = self.root_scope().current();
        if path.is_empty() {
            return Ok(root);
        }

        let (parent_path, name) = split_path(&path);
        let parent = self.resolve(parent_path).await?;
        if !parent.is_dir() {
            return Err(DriveError::not_a_directory(parent_path));
        }

        match self.lookup_child(&root, &parent, &path, name).await? {
            Some(node) if node.is_dir() => Ok(node),
            Some(_) => Err(DriveError::not_a_directory(path.as_str())),
            None => {
                self.create_child(&root, &parent, &path, name, NodeKind::Directory)
                    .await
            }
        }
    }

    /// Look up the node at `path`.
    #[instrument(skip(self), level = "debug")]
    pub async fn stat(&self, path: &str) -> Result<Node> {
        self.resolve(&normalize_path(path)).await
    }

    /// Move and/or rename `old_path` to `new_path` in one backend patch.
    ///
    /// An existing file at the target is removed first; an existing
    /// directory there is an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<Node> {
        let old_path = normalize_path(old_path);
        let new_path = normalize_path(new_path);
        if old_path.is_empty() {
            return Err(DriveError::ForbiddenRootOperation);
        }
        if new_path.is_empty() {
            return Err(DriveError::EmptyPath);
        }

        let root = self.root_scope().current();
        let node = self.resolve(&old_path).await?;
        if old_path == new_path {
            return Ok(node);
        }
        if node.is_dir() && is_within(&new_path, &old_path) {
            return Err(DriveError::Custom(format!(
                "cannot move {} into itself",
                old_path
            )));
        }

        let (old_parent_path, _) = split_path(&old_path);
        let (new_parent_path, new_name) = split_path(&new_path);
        let new_parent = self.resolve(new_parent_path).await?;
        if !new_parent.is_dir() {
            return Err(DriveError::not_a_directory(new_parent_path));
        }

        match self.lookup_child(&root, &new_parent, &new_path, new_name).await? {
            Some(existing) if existing.id == node.id => {}
            Some(existing) if existing.is_dir() => {
                return Err(DriveError::AlreadyExists { path: new_path });
            }
            Some(existing) => {
                self.discard(&new_path, &existing).await?;
                debug!(path = %new_path, "replaced existing file");
            }
            None => {}
        }

        let old_parent = self.resolve(old_parent_path).await?;
        let mut patch = NodePatch::default();
        if node.name != new_name {
            patch.name = Some(new_name.to_string());
        }
        if old_parent.id != new_parent.id {
            patch.add_parents.push(new_parent.id.clone());
            patch.remove_parents.push(old_parent.id.clone());
        }

        let updated = if patch.is_empty() {
            node
        } else {
            self.store()
                .patch(&node.id, patch)
                .await
                .context("rename", &old_path)?
        };

        self.cache().evict_tree(&root.id, &old_path);
        self.cache().evict_tree(&root.id, &new_path);
        self.cache().insert(&root.id, &new_path, updated.clone());
        Ok(updated)
    }

    /// Remove `path`, deleting or trashing it depending on the drive setting.
    #[instrument(skip(self), level = "debug")]
    pub async fn remove(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(DriveError::ForbiddenRootOperation);
        }
        let node = self.resolve(&path).await?;
        self.discard(&path, &node).await
    }

    /// Like [`Drive::remove`], but a missing path is not an error.
    pub async fn remove_all(&self, path: &str) -> Result<()> {
        match self.remove(path).await {
            Err(DriveError::NotExist { .. }) => Ok(()),
            other => other,
        }
    }

    /// Remove the directory at `path` together with its contents.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_directory(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(DriveError::ForbiddenRootOperation);
        }
        let node = self.resolve(&path).await?;
        if !node.is_dir() {
            return Err(DriveError::not_a_directory(path));
        }
        self.discard(&path, &node).await
    }

    /// Permissions are not modelled; only checks that `path` exists.
    pub async fn chmod(&self, path: &str, _mode: u32) -> Result<()> {
        self.stat(path).await.map(|_| ())
    }

    /// Set access and modification times.
    #[instrument(skip(self), level = "debug")]
    pub async fn chtimes(
        &self,
        path: &str,
        accessed: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Result<Node> {
        let path = normalize_path(path);
        let root = self.root_scope().id();
        let node = self.resolve(&path).await?;
        let patch = NodePatch {
            modified: Some(modified),
            accessed: Some(accessed),
            ..Default::default()
        };
        let updated = self
            .store()
            .patch(&node.id, patch)
            .await
            .context("chtimes", &path)?;
        self.cache().insert(&root, &path, updated.clone());
        Ok(updated)
    }

    /// Ownership has no Drive equivalent.
    pub async fn chown(&self, _path: &str, _uid: u32, _gid: u32) -> Result<()> {
        Err(DriveError::Unsupported)
    }

    async fn discard(&self, path: &str, node: &Node) -> Result<()> {
        let root = self.root_scope().id();
        if self.trash_for_delete() {
            self.trash_node(path, node).await?;
        } else {
            self.store().delete(&node.id).await.context("remove", path)?;
            debug!(path, id = %node.id, "deleted");
        }
        self.cache().evict_tree(&root, path);
        Ok(())
    }

    /// Create a child under `parent`.
    ///
    /// Drive accepts duplicate names, so a concurrent creator may have added
    /// the same entry meanwhile. The oldest entry wins: a newer node of ours
    /// is deleted again and the winner returned instead.
    pub(crate) async fn create_child(
        &self,
        root: &Node,
        parent: &Node,
        path: &str,
        name: &str,
        kind: NodeKind,
    ) -> Result<Node> {
        let created = self
            .store()
            .create(&parent.id, name, kind)
            .await
            .context("create", path)?;

        let node = match self
            .store()
            .find_child(&parent.id, name)
            .await
            .context("create", path)?
        {
            Some(winner) if winner.id != created.id && winner.kind == kind => {
                debug!(path, id = %winner.id, lost = %created.id, "adopting concurrent create");
                if let Err(err) = self.store().delete(&created.id).await {
                    warn!(path, id = %created.id, error = %err, "failed to remove duplicate");
                }
                winner
            }
            _ => created,
        };
        debug!(path, id = %node.id, ?kind, "created");
        self.cache().insert(&root.id, path, node.clone());
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::BoxStream;

    use crate::api::{ContentUpload, MemoryStore, NodePage, NodePatch, NodeStore};
    use crate::config::DriveConfig;
    use crate::drive::Drive;
    use crate::error::{DriveError, Result};
    use crate::fs::{Node, NodeKind};

    /// Adds latency to lookups and creates so concurrent callers interleave.
    struct SlowStore(MemoryStore);

    impl SlowStore {
        async fn pause() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[async_trait]
    impl NodeStore for SlowStore {
        async fn get(&self, id: &str) -> Result<Node> {
            Self::pause().await;
            self.0.get(id).await
        }

        async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<Node>> {
            Self::pause().await;
            self.0.find_child(parent_id, name).await
        }

        async fn list_children(
            &self,
            parent_id: &str,
            page_token: Option<&str>,
            page_size: usize,
        ) -> Result<NodePage> {
            self.0.list_children(parent_id, page_token, page_size).await
        }

        async fn list_trashed(
            &self,
            page_token: Option<&str>,
            page_size: usize,
        ) -> Result<NodePage> {
            self.0.list_trashed(page_token, page_size).await
        }

        async fn create(&self, parent_id: &str, name: &str, kind: NodeKind) -> Result<Node> {
            Self::pause().await;
            self.0.create(parent_id, name, kind).await
        }

        async fn patch(&self, id: &str, patch: NodePatch) -> Result<Node> {
            self.0.patch(id, patch).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            self.0.delete(id).await
        }

        async fn write_content(&self, id: &str, data: Bytes) -> Result<Node> {
            self.0.write_content(id, data).await
        }

        async fn begin_upload(&self, id: &str) -> Result<Box<dyn ContentUpload>> {
            self.0.begin_upload(id).await
        }

        async fn upload_stream(
            &self,
            id: &str,
            body: BoxStream<'static, Result<Bytes>>,
        ) -> Result<Node> {
            self.0.upload_stream(id, body).await
        }

        async fn read_content(&self, id: &str) -> Result<Bytes> {
            self.0.read_content(id).await
        }
    }

    async fn slow_drive() -> (Drive, MemoryStore) {
        let store = MemoryStore::new();
        let drive = Drive::new(SlowStore(store.clone()), DriveConfig::default())
            .await
            .unwrap();
        (drive, store)
    }

    async fn drive() -> (Drive, MemoryStore) {
        let store = MemoryStore::new();
        let drive = Drive::new(store.clone(), DriveConfig::default()).await.unwrap();
        (drive, store)
    }

    async fn touch(drive: &Drive, path: &str) {
        drive.create(path).await.unwrap().close().await.unwrap();
    }

    #[tokio::test]
    async fn test_mkdir_all_is_idempotent() {
        let (drive, store) = drive().await;
        let first = drive.mkdir_all("/Folder1/Sub/Deep", 0o755).await.unwrap();
        let nodes = store.node_count();

        let second = drive.mkdir_all("Folder1/Sub/Deep/", 0o755).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.node_count(), nodes);
        assert!(drive.stat("Folder1/Sub").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_mkdir_all_through_file() {
        let (drive, _) = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();
        touch(&drive, "Folder1/File1").await;

        let err = drive.mkdir_all("Folder1/File1/x", 0o755).await.unwrap_err();
        assert_eq!(err.to_string(), "file Folder1/File1 is not a directory");
        let err = drive.mkdir_all("Folder1/File1", 0o755).await.unwrap_err();
        assert!(matches!(err, DriveError::NotADirectory { .. }));
    }

    #[tokio::test]
    async fn test_mkdir_all_empty_returns_root() {
        let (drive, _) = drive().await;
        let root = drive.mkdir_all("", 0o755).await.unwrap();
        assert_eq!(root.id, drive.root().id);
    }

    #[tokio::test]
    async fn test_mkdir_requires_parent() {
        let (drive, _) = drive().await;
        let err = drive.mkdir("a/b", 0o755).await.unwrap_err();
        assert_eq!(err.to_string(), "`a' does not exist");

        let a = drive.mkdir("a", 0o755).await.unwrap();
        assert_eq!(drive.mkdir("a", 0o755).await.unwrap().id, a.id);
        drive.mkdir("a/b", 0o755).await.unwrap();
        assert!(drive.stat("a/b").await.unwrap().is_dir());
    }

    #[tokio::test]
    async fn test_stat_missing_names_first_missing_prefix() {
        let (drive, _) = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();
        let err = drive.stat("Folder1/Nope/File").await.unwrap_err();
        assert_eq!(err.to_string(), "`Folder1/Nope' does not exist");
    }

    #[tokio::test]
    async fn test_stat_root() {
        let (drive, _) = drive().await;
        let root = drive.stat("/").await.unwrap();
        assert_eq!(root.id, drive.root().id);
    }

    #[tokio::test]
    async fn test_rename_moves_and_renames() {
        let (drive, store) = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();
        drive.mkdir_all("Folder2", 0o755).await.unwrap();
        touch(&drive, "Folder1/File1").await;
        let original = drive.stat("Folder1/File1").await.unwrap();

        let mutations = store.mutation_count();
        let moved = drive.rename("Folder1/File1", "Folder2/File2").await.unwrap();
        assert_eq!(store.mutation_count() - mutations, 1);
        assert_eq!(moved.id, original.id);
        assert_eq!(moved.name, "File2");

        assert!(drive.stat("Folder1/File1").await.unwrap_err().is_not_found());
        assert_eq!(drive.stat("Folder2/File2").await.unwrap().id, original.id);
    }

    #[tokio::test]
    async fn test_rename_leaves_siblings_alone() {
        let (drive, _) = drive().await;
        touch(&drive, "Folder1/File1").await;
        touch(&drive, "Folder1/Other").await;
        let sibling = drive.stat("Folder1/Other").await.unwrap();

        drive.rename("Folder1/File1", "Folder1/File2").await.unwrap();
        assert_eq!(drive.stat("Folder1/Other").await.unwrap().id, sibling.id);
        let mut dir = drive.open("Folder1").await.unwrap();
        assert_eq!(dir.readdirnames(-1).await.unwrap(), ["File2", "Other"]);
    }

    #[tokio::test]
    async fn test_concurrent_creates_share_missing_parent() {
        let (drive, store) = slow_drive().await;

        let tasks: Vec<_> = ["d/x", "d/y"]
            .into_iter()
            .map(|path| {
                let drive = drive.clone();
                tokio::spawn(async move {
                    let mut file = drive.create(path).await?;
                    file.write_str(path).await?;
                    file.close().await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let top = store.list_children(&drive.root().id, None, 100).await.unwrap();
        assert_eq!(top.nodes.len(), 1);
        assert_eq!(top.nodes[0].name, "d");

        let mut dir = drive.open("d").await.unwrap();
        assert_eq!(dir.readdirnames(-1).await.unwrap(), ["x", "y"]);
        let mut file = drive.open("d/y").await.unwrap();
        assert_eq!(file.read_to_end().await.unwrap(), b"d/y");
    }

    #[tokio::test]
    async fn test_concurrent_mkdir_all_single_chain() {
        let (drive, store) = slow_drive().await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let drive = drive.clone();
                tokio::spawn(async move { drive.mkdir_all("a/b/c", 0o755).await })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);

        let mut parent = drive.root().id;
        for name in ["a", "b", "c"] {
            let page = store.list_children(&parent, None, 100).await.unwrap();
            assert_eq!(page.nodes.len(), 1, "{name}");
            assert_eq!(page.nodes[0].name, name);
            parent = page.nodes[0].id.clone();
        }
        assert_eq!(parent, ids[0]);
    }

    #[tokio::test]
    async fn test_rename_directory_evicts_descendants() {
        let (drive, _) = drive().await;
        drive.mkdir_all("Folder1/Sub", 0o755).await.unwrap();
        touch(&drive, "Folder1/Sub/File").await;
        drive.stat("Folder1/Sub/File").await.unwrap();

        drive.rename("Folder1", "Renamed").await.unwrap();
        assert!(drive.stat("Folder1/Sub/File").await.unwrap_err().is_not_found());
        assert!(drive.stat("Renamed/Sub/File").await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_rename_validation() {
        let (drive, _) = drive().await;
        drive.mkdir_all("Folder1/Sub", 0o755).await.unwrap();
        drive.mkdir_all("Folder2", 0o755).await.unwrap();

        let err = drive.rename("", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "forbidden for root directory");
        let err = drive.rename("Folder1", "/").await.unwrap_err();
        assert_eq!(err.to_string(), "path cannot be empty");
        let err = drive.rename("Missing", "x").await.unwrap_err();
        assert!(matches!(err, DriveError::NotExist { .. }));
        let err = drive.rename("Folder1", "Nowhere/x").await.unwrap_err();
        assert_eq!(err.to_string(), "`Nowhere' does not exist");
        let err = drive.rename("Folder1", "Folder2").await.unwrap_err();
        assert_eq!(err.to_string(), "file Folder2 already exists");
        let err = drive.rename("Folder1", "Folder1/Sub/x").await.unwrap_err();
        assert!(matches!(err, DriveError::Custom(_)));
    }

    #[tokio::test]
    async fn test_rename_replaces_file() {
        let (drive, _) = drive().await;
        touch(&drive, "a").await;
        touch(&drive, "b").await;
        let a = drive.stat("a").await.unwrap();

        drive.rename("a", "b").await.unwrap();
        assert_eq!(drive.stat("b").await.unwrap().id, a.id);
        assert!(drive.stat("a").await.is_err());
    }

    #[tokio::test]
    async fn test_remove() {
        let (drive, store) = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();
        touch(&drive, "Folder1/File1").await;
        let file = drive.stat("Folder1/File1").await.unwrap();

        drive.remove("Folder1/File1").await.unwrap();
        assert!(drive.stat("Folder1/File1").await.unwrap_err().is_not_found());
        assert!(store.content(&file.id).is_none());

        let err = drive.remove("Folder1/File1").await.unwrap_err();
        assert!(matches!(err, DriveError::NotExist { .. }));
        drive.remove_all("Folder1/File1").await.unwrap();

        let err = drive.remove("/").await.unwrap_err();
        assert!(matches!(err, DriveError::ForbiddenRootOperation));
    }

    #[tokio::test]
    async fn test_remove_with_trash_enabled() {
        let (drive, store) = drive().await;
        drive.set_trash_for_delete(true);
        touch(&drive, "File1").await;
        let file = drive.stat("File1").await.unwrap();

        drive.remove("File1").await.unwrap();
        assert!(drive.stat("File1").await.is_err());
        assert!(store.content(&file.id).is_some());
        let trash = drive.list_trash("", 0).await.unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].path(), "File1");
    }

    #[tokio::test]
    async fn test_delete_directory() {
        let (drive, _) = drive().await;
        drive.mkdir_all("Folder1/Sub", 0o755).await.unwrap();
        touch(&drive, "Folder1/File1").await;

        let err = drive.delete_directory("Folder1/File1").await.unwrap_err();
        assert!(matches!(err, DriveError::NotADirectory { .. }));

        drive.delete_directory("Folder1").await.unwrap();
        assert!(drive.stat("Folder1/Sub").await.is_err());
        assert!(drive.stat("Folder1/File1").await.is_err());
    }

    #[tokio::test]
    async fn test_chtimes_and_chown() {
        let (drive, _) = drive().await;
        touch(&drive, "File1").await;
        let modified = chrono::DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        let accessed = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let node = drive.chtimes("File1", accessed, modified).await.unwrap();
        assert_eq!(node.modified, Some(modified));
        assert_eq!(drive.stat("File1").await.unwrap().accessed, Some(accessed));

        drive.chmod("File1", 0o600).await.unwrap();
        assert!(drive.chmod("Missing", 0o600).await.is_err());
        assert!(matches!(
            drive.chown("File1", 0, 0).await,
            Err(DriveError::Unsupported)
        ));
    }
}
