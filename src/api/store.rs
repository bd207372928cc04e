//! The `NodeStore` trait: everything the filesystem layer asks of the backend.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::Result;
use crate::fs::{Node, NodeKind};

/// Id alias the backend resolves to its absolute top ("My Drive").
pub const TOP_ALIAS: &str = "root";

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct NodePage {
    pub nodes: Vec<Node>,
    /// Continuation token; `None` once the listing is exhausted.
    pub next_page_token: Option<String>,
}

/// A metadata patch applied atomically by the backend.
#[derive(Debug, Clone, Default)]
pub struct NodePatch {
    pub name: Option<String>,
    pub add_parents: Vec<String>,
    pub remove_parents: Vec<String>,
    pub trashed: Option<bool>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl NodePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.add_parents.is_empty()
            && self.remove_parents.is_empty()
            && self.trashed.is_none()
            && self.modified.is_none()
            && self.accessed.is_none()
    }
}

/// Chunked content upload that only becomes visible on `finish`.
#[async_trait]
pub trait ContentUpload: Send {
    /// Append the next chunk in order.
    async fn append(&mut self, data: Bytes) -> Result<()>;

    /// Commit everything appended so far as the node's new content.
    async fn finish(self: Box<Self>) -> Result<Node>;
}

/// Backend operations over an authenticated transport.
///
/// Listing and lookup methods never return trashed nodes, except
/// `list_trashed` which returns only explicitly trashed ones.
#[async_trait]
pub trait NodeStore: Send + Sync + 'static {
    /// Fetch node metadata by id. `TOP_ALIAS` names the backend top.
    async fn get(&self, id: &str) -> Result<Node>;

    /// Find a non-trashed child by name. Duplicates resolve to the first
    /// match in backend order.
    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<Node>>;

    /// List non-trashed children, ordered by name.
    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<NodePage>;

    /// List explicitly trashed nodes anywhere in the store.
    async fn list_trashed(&self, page_token: Option<&str>, page_size: usize) -> Result<NodePage>;

    /// Create an empty file or a directory under `parent_id`.
    async fn create(&self, parent_id: &str, name: &str, kind: NodeKind) -> Result<Node>;

    /// Apply a metadata patch in one request.
    async fn patch(&self, id: &str, patch: NodePatch) -> Result<Node>;

    /// Permanently delete a node; the backend cascades to descendants.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Replace the node's content in a single request.
    async fn write_content(&self, id: &str, data: Bytes) -> Result<Node>;

    /// Start a chunked upload that replaces the node's content on finish.
    async fn begin_upload(&self, id: &str) -> Result<Box<dyn ContentUpload>>;

    /// Replace the node's content with one continuous streamed upload.
    async fn upload_stream(&self, id: &str, body: BoxStream<'static, Result<Bytes>>)
        -> Result<Node>;

    /// Download the node's content.
    async fn read_content(&self, id: &str) -> Result<Bytes>;

    /// The backend's absolute top.
    async fn top(&self) -> Result<Node> {
        self.get(TOP_ALIAS).await
    }
}
