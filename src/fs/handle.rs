//! Open file and directory handles.

use std::fmt;
use std::io::SeekFrom;

use bytes::Bytes;
use tracing::debug;

use crate::drive::Drive;
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::node::Node;
use crate::fs::operations::DirCursor;
use crate::fs::write_buffer::{WriteBuffer, WriteSettings};

/// How to open a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    create: bool,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Create the file, and any missing parents, when it does not exist.
    /// Only honoured together with `write`.
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn is_create(&self) -> bool {
        self.create
    }
}

/// An open path.
///
/// Writes are append-only and go through the write strategy the drive had
/// configured at open time. Call [`FileHandle::close`] to commit them;
/// dropping a handle discards whatever was still buffered.
pub struct FileHandle {
    drive: Drive,
    root_id: String,
    path: String,
    node: Node,
    readable: bool,
    offset: u64,
    content: Option<Bytes>,
    settings: Option<WriteSettings>,
    writer: Option<WriteBuffer>,
    /// Committed content must be replayed before the next write.
    reseed: bool,
    failed: bool,
    listing: Option<DirCursor>,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("id", &self.node.id)
            .field("readable", &self.readable)
            .field("writable", &self.settings.is_some())
            .field("offset", &self.offset)
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(
        drive: Drive,
        root_id: String,
        path: String,
        node: Node,
        readable: bool,
        settings: Option<WriteSettings>,
    ) -> Self {
        Self {
            drive,
            root_id,
            path,
            node,
            readable,
            offset: 0,
            content: None,
            settings,
            writer: None,
            reseed: false,
            failed: false,
            listing: None,
        }
    }

    /// Root-relative path the handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Node snapshot as of open or the last commit.
    pub fn stat(&self) -> Node {
        self.node.clone()
    }

    /// Read from the current offset. Returns 0 at end of file.
    ///
    /// Pending writes are committed first so reads observe them.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.node.is_dir() {
            return Err(DriveError::IsADirectory {
                path: self.path.clone(),
            });
        }
        if !self.readable {
            return Err(DriveError::Custom(format!(
                "file {} is not open for reading",
                self.path
            )));
        }
        self.sync().await?;

        let content = self.load_content().await?;
        let start = usize::try_from(self.offset)
            .unwrap_or(usize::MAX)
            .min(content.len());
        let n = buf.len().min(content.len() - start);
        buf[..n].copy_from_slice(&content[start..start + n]);
        self.offset += n as u64;
        Ok(n)
    }

    /// Read everything from the current offset to the end.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    /// Move the read offset. Not available once bytes were written.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        if self.writer.as_ref().is_some_and(|w| w.written() > 0) {
            return Err(DriveError::Unsupported);
        }
        let size = match &self.content {
            Some(content) => content.len() as u64,
            None => self.node.size,
        };
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => size.checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(DriveError::Custom(format!(
                "invalid seek on {}",
                self.path
            ))),
        }
    }

    /// Append `data` to the file.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Some(settings) = self.settings else {
            return Err(DriveError::Custom(format!(
                "file {} is not open for writing",
                self.path
            )));
        };
        if self.failed {
            return Err(DriveError::Custom(format!(
                "write to {} failed earlier",
                self.path
            )));
        }
        if data.is_empty() {
            return Ok(0);
        }

        let base = if self.reseed {
            Some(self.load_content().await?)
        } else {
            None
        };

        let writer = self.writer.get_or_insert_with(|| {
            WriteBuffer::new(
                settings,
                std::sync::Arc::clone(self.drive.store()),
                self.node.id.clone(),
            )
        });

        let mut result = Ok(());
        if let Some(base) = base {
            result = writer.write(&base).await;
        }
        if result.is_ok() {
            result = writer.write(data).await;
        }

        match result {
            Ok(()) => {
                self.reseed = false;
                self.content = None;
                Ok(data.len())
            }
            Err(err) => {
                self.writer = None;
                self.failed = true;
                Err(err).context("write", &self.path)
            }
        }
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write(data).await.map(|_| ())
    }

    pub async fn write_str(&mut self, data: &str) -> Result<usize> {
        self.write(data.as_bytes()).await
    }

    /// Commit everything written so far.
    ///
    /// Later writes continue after the committed content.
    pub async fn sync(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        if writer.written() == 0 {
            self.writer = Some(writer);
            return Ok(());
        }
        self.commit(writer, "sync").await?;
        self.reseed = true;
        Ok(())
    }

    /// Not supported: content can only be replaced by writing.
    pub async fn truncate(&mut self, _size: u64) -> Result<()> {
        Err(DriveError::Unsupported)
    }

    /// Next `limit` directory entries; `limit <= 0` returns all remaining.
    pub async fn readdir(&mut self, limit: i64) -> Result<Vec<Node>> {
        if !self.node.is_dir() {
            return Err(DriveError::not_a_directory(self.path.as_str()));
        }
        let cursor = self.listing.get_or_insert_with(DirCursor::default);
        self.drive
            .read_dir_page(&self.path, &self.node.id, cursor, limit)
            .await
    }

    pub async fn readdirnames(&mut self, limit: i64) -> Result<Vec<String>> {
        let nodes = self.readdir(limit).await?;
        Ok(nodes.into_iter().map(|node| node.name).collect())
    }

    /// Commit pending writes and release the handle.
    pub async fn close(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            self.commit(writer, "close").await?;
        }
        Ok(())
    }

    async fn commit(&mut self, writer: WriteBuffer, op: &'static str) -> Result<()> {
        let written = writer.written();
        if let Some(node) = writer.finish().await.context(op, &self.path)? {
            debug!(path = %self.path, bytes = written, "committed content");
            // The path may have been renamed or trashed while the handle was
            // open; only refresh an entry that still names this node.
            let cache = self.drive.cache();
            match cache.get(&self.root_id, &self.path) {
                Some(cached) if cached.id == node.id && !node.trashed => {
                    cache.insert(&self.root_id, &self.path, node.clone());
                }
                Some(cached) if cached.id == node.id => {
                    cache.evict_tree(&self.root_id, &self.path);
                }
                _ => {}
            }
            self.node = node;
        }
        self.content = None;
        Ok(())
    }

    async fn load_content(&mut self) -> Result<Bytes> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        let content = self
            .drive
            .store()
            .read_content(&self.node.id)
            .await
            .context("read", &self.path)?;
        self.content = Some(content.clone());
        Ok(content)
    }
}
