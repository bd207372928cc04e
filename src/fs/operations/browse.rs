//! Opening paths and paging through directories.

use std::collections::VecDeque;

use tracing::{debug, instrument};

use crate::drive::Drive;
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::handle::{FileHandle, OpenOptions};
use crate::fs::node::{Node, NodeKind};
use crate::fs::path::{normalize_path, split_path};

/// Page size used when the caller asks for the whole listing.
const LIST_PAGE_SIZE: usize = 1000;

/// Listing position of an open directory handle.
#[derive(Debug, Default)]
pub(crate) struct DirCursor {
    page_token: Option<String>,
    pending: VecDeque<Node>,
    exhausted: bool,
}

impl Drive {
    /// Open `path` read-only.
    pub async fn open(&self, path: &str) -> Result<FileHandle> {
        self.open_file(path, OpenOptions::new().read(true)).await
    }

    /// Create or reuse the file at `path` and open it for writing.
    ///
    /// Missing parent directories are created.
    pub async fn create(&self, path: &str) -> Result<FileHandle> {
        self.open_file(path, OpenOptions::new().write(true).create(true))
            .await
    }

    /// Open `path` with explicit options.
    ///
    /// Without `create`, a missing path fails with the full path. An empty
    /// path opens the root, unless writing was requested.
    #[instrument(skip(self), level = "debug")]
    pub async fn open_file(&self, path: &str, options: OpenOptions) -> Result<FileHandle> {
        let path = normalize_path(path);
        if path.is_empty() && (options.is_write() || options.is_create()) {
            return Err(DriveError::EmptyPath);
        }

        let root_id = self.root_scope().id();
        let node = match self.resolve(&path).await {
            Ok(node) => node,
            Err(DriveError::NotExist { .. }) if options.is_write() && options.is_create() => {
                self.create_file(&path).await?
            }
            Err(DriveError::NotExist { .. }) => return Err(DriveError::not_exist(path)),
            Err(err) => return Err(err),
        };

        if options.is_write() && node.is_dir() {
            return Err(DriveError::IsADirectory { path });
        }

        let settings = options.is_write().then(|| self.write_settings());
        Ok(FileHandle::new(
            self.clone(),
            root_id,
            path,
            node,
            options.is_read() || !options.is_write(),
            settings,
        ))
    }

    async fn create_file(&self, path: &str) -> Result<Node> {
        let root = self.root_scope().current();
        let (parent_path, name) = split_path(path);
        let parent = self.mkdir_all(parent_path, 0o755).await?;
        let node = self
            .create_child(&root, &parent, path, name, NodeKind::File)
            .await?;
        debug!(path, id = %node.id, "created file");
        Ok(node)
    }

    /// Return up to `limit` further entries of the directory `dir_id`.
    ///
    /// A `limit` of zero or less drains the rest of the listing. Once the
    /// listing is exhausted every call returns an empty vector.
    pub(crate) async fn read_dir_page(
        &self,
        dir_path: &str,
        dir_id: &str,
        cursor: &mut DirCursor,
        limit: i64,
    ) -> Result<Vec<Node>> {
        let want = usize::try_from(limit).ok().filter(|n| *n > 0);
        let mut entries = Vec::new();

        loop {
            while want.map_or(true, |n| entries.len() < n) {
                match cursor.pending.pop_front() {
                    Some(node) => entries.push(node),
                    None => break,
                }
            }
            if want.is_some_and(|n| entries.len() >= n) || cursor.exhausted {
                return Ok(entries);
            }

            let page_size = want
                .map(|n| n - entries.len())
                .unwrap_or(LIST_PAGE_SIZE)
                .clamp(1, LIST_PAGE_SIZE);
            let page = self
                .store()
                .list_children(dir_id, cursor.page_token.as_deref(), page_size)
                .await
                .context("readdir", dir_path)?;

            cursor.pending.extend(page.nodes);
            cursor.exhausted = page.next_page_token.is_none();
            cursor.page_token = page.next_page_token;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::MemoryStore;
    use crate::config::DriveConfig;
    use crate::drive::Drive;
    use crate::error::DriveError;
    use crate::fs::OpenOptions;

    async fn drive() -> Drive {
        Drive::new(MemoryStore::new(), DriveConfig::default()).await.unwrap()
    }

    async fn write_file(drive: &Drive, path: &str, content: &[u8]) {
        let mut handle = drive.create(path).await.unwrap();
        handle.write(content).await.unwrap();
        handle.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_reports_full_path() {
        let drive = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();

        let err = drive.open("Folder1/Nope/File").await.unwrap_err();
        assert_eq!(err.to_string(), "`Folder1/Nope/File' does not exist");

        // Create without write still needs the file to exist.
        let err = drive
            .open_file("Folder1/File", OpenOptions::new().read(true).create(true))
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::NotExist { .. }));
    }

    #[tokio::test]
    async fn test_failed_open_creates_nothing() {
        let store = MemoryStore::new();
        let drive = Drive::new(store.clone(), DriveConfig::default()).await.unwrap();
        let nodes = store.node_count();
        let mutations = store.mutation_count();

        assert!(drive.open("a/b/c").await.is_err());
        assert!(drive
            .open_file("a/b/c", OpenOptions::new().write(true))
            .await
            .is_err());
        assert_eq!(store.node_count(), nodes);
        assert_eq!(store.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_unsupported_operations_do_not_mutate() {
        let store = MemoryStore::new();
        let drive = Drive::new(store.clone(), DriveConfig::default()).await.unwrap();
        let mut file = drive.create("File1").await.unwrap();
        file.write_all(b"data").await.unwrap();
        file.close().await.unwrap();
        let mutations = store.mutation_count();

        assert!(matches!(
            drive.chown("File1", 1000, 1000).await,
            Err(DriveError::Unsupported)
        ));
        let mut file = drive
            .open_file("File1", OpenOptions::new().write(true))
            .await
            .unwrap();
        assert!(matches!(file.truncate(0).await, Err(DriveError::Unsupported)));
        file.close().await.unwrap();

        assert_eq!(store.mutation_count(), mutations);
        assert_eq!(drive.stat("File1").await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_create_makes_parents() {
        let drive = drive().await;
        write_file(&drive, "a/b/c.txt", b"Hello World").await;

        assert!(drive.stat("a/b").await.unwrap().is_dir());
        let node = drive.stat("a/b/c.txt").await.unwrap();
        assert_eq!(node.size, 11);
    }

    #[tokio::test]
    async fn test_create_under_file_fails() {
        let drive = drive().await;
        write_file(&drive, "Folder1/File1", b"x").await;

        let err = drive.create("Folder1/File1/File2").await.unwrap_err();
        assert_eq!(err.to_string(), "file Folder1/File1 is not a directory");
    }

    #[tokio::test]
    async fn test_open_empty_path() {
        let drive = drive().await;
        let handle = drive.open("/").await.unwrap();
        assert_eq!(handle.stat().id, drive.root().id);

        let err = drive.create("").await.unwrap_err();
        assert!(matches!(err, DriveError::EmptyPath));
    }

    #[tokio::test]
    async fn test_open_directory_for_write() {
        let drive = drive().await;
        drive.mkdir_all("Folder1", 0o755).await.unwrap();
        let err = drive.create("Folder1").await.unwrap_err();
        assert_eq!(err.to_string(), "file Folder1 is a directory");
    }

    #[tokio::test]
    async fn test_readdir_partial_pages() {
        let drive = drive().await;
        for name in ["File1", "File2", "File3", "File4", "File5"] {
            write_file(&drive, &format!("Folder1/{}", name), b"").await;
        }

        let mut dir = drive.open("Folder1").await.unwrap();
        let names = |nodes: Vec<crate::fs::Node>| {
            nodes.into_iter().map(|n| n.name).collect::<Vec<_>>()
        };
        assert_eq!(names(dir.readdir(2).await.unwrap()), ["File1", "File2"]);
        assert_eq!(names(dir.readdir(2).await.unwrap()), ["File3", "File4"]);
        assert_eq!(names(dir.readdir(2).await.unwrap()), ["File5"]);
        assert!(dir.readdir(2).await.unwrap().is_empty());
        assert!(dir.readdir(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readdir_any_page_size_lists_each_entry_once() {
        let drive = drive().await;
        let all = ["a", "b", "c", "d", "e", "f", "g"];
        for name in all {
            write_file(&drive, &format!("Dir/{}", name), b"").await;
        }

        for limit in [1, 2, 3, 5, 7] {
            let mut dir = drive.open("Dir").await.unwrap();
            let mut seen = Vec::new();
            loop {
                let page = dir.readdirnames(limit).await.unwrap();
                if page.is_empty() {
                    break;
                }
                assert!(page.len() <= limit as usize, "limit {limit}");
                seen.extend(page);
            }
            assert_eq!(seen, all, "limit {limit}");
            assert!(dir.readdirnames(limit).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_open_folds_parent_segments() {
        let drive = drive().await;
        write_file(&drive, "Folder1/File1", b"x").await;

        let file = drive.open("Folder1/../Folder1/File1").await.unwrap();
        assert_eq!(file.path(), "Folder1/File1");
        let root = drive.open("../..").await.unwrap();
        assert_eq!(root.stat().id, drive.root().id);
    }

    #[tokio::test]
    async fn test_readdir_all() {
        let drive = drive().await;
        for name in ["b", "a", "c"] {
            write_file(&drive, &format!("Dir/{}", name), b"").await;
        }
        drive.mkdir_all("Dir/sub", 0o755).await.unwrap();

        let mut dir = drive.open("Dir").await.unwrap();
        assert_eq!(dir.readdirnames(-1).await.unwrap(), ["a", "b", "c", "sub"]);
    }

    #[tokio::test]
    async fn test_readdir_on_file() {
        let drive = drive().await;
        write_file(&drive, "File1", b"x").await;
        let mut file = drive.open("File1").await.unwrap();
        let err = file.readdir(0).await.unwrap_err();
        assert_eq!(err.to_string(), "file File1 is not a directory");
    }
}
