//! In-process node store with Drive's data model.
//!
//! Nodes may have several parents, names are not unique under a parent and
//! trashing a folder implicitly trashes everything below it. Useful for
//! tests and for running the filesystem layer without network access.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::stream::{BoxStream, TryStreamExt};
use parking_lot::Mutex;

use super::error::ApiErrorReason;
use super::store::{ContentUpload, NodePage, NodePatch, NodeStore, TOP_ALIAS};
use crate::error::{DriveError, Result};
use crate::fs::node::FOLDER_MIME_TYPE;
use crate::fs::{Node, NodeKind};

const TOP_ID: &str = "0AtopMemoryDrive";

struct StoredNode {
    node: Node,
    content: Bytes,
    seq: u64,
}

struct MemoryState {
    nodes: HashMap<String, StoredNode>,
    next_seq: u64,
}

impl MemoryState {
    fn resolve_alias<'a>(&self, id: &'a str) -> &'a str {
        if id == TOP_ALIAS {
            TOP_ID
        } else {
            id
        }
    }

    fn lookup(&self, id: &str) -> Result<&StoredNode> {
        let id = self.resolve_alias(id);
        self.nodes.get(id).ok_or_else(|| not_found(id))
    }

    fn lookup_mut(&mut self, id: &str) -> Result<&mut StoredNode> {
        let id = self.resolve_alias(id).to_string();
        self.nodes.get_mut(&id).ok_or_else(|| not_found(&id))
    }

    fn children_of(&self, parent_id: &str) -> Vec<&StoredNode> {
        let mut children: Vec<&StoredNode> = self
            .nodes
            .values()
            .filter(|s| !s.node.trashed && s.node.parents.iter().any(|p| p == parent_id))
            .collect();
        children.sort_by(|a, b| a.node.name.cmp(&b.node.name).then(a.seq.cmp(&b.seq)));
        children
    }

    fn descendants(&self, id: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut pending = vec![id.to_string()];
        while let Some(current) = pending.pop() {
            for stored in self.nodes.values() {
                if stored.node.parents.contains(&current) && !found.contains(&stored.node.id) {
                    found.push(stored.node.id.clone());
                    pending.push(stored.node.id.clone());
                }
            }
        }
        found
    }

    fn set_content(&mut self, id: &str, content: Bytes) -> Result<Node> {
        let stored = self.lookup_mut(id)?;
        if stored.node.is_dir() {
            return Err(DriveError::ApiError {
                code: 400,
                reason: ApiErrorReason::BadRequest,
                message: "Folders have no content".to_string(),
            });
        }
        stored.node.size = content.len() as u64;
        stored.node.modified = Some(Utc::now());
        stored.content = content;
        Ok(stored.node.clone())
    }
}

fn not_found(id: &str) -> DriveError {
    DriveError::ApiError {
        code: 404,
        reason: ApiErrorReason::NotFound,
        message: format!("File not found: {}.", id),
    }
}

fn paginate(nodes: Vec<Node>, page_token: Option<&str>, page_size: usize) -> Result<NodePage> {
    let start = match page_token {
        Some(token) => token.parse::<usize>().map_err(|_| DriveError::ApiError {
            code: 400,
            reason: ApiErrorReason::BadRequest,
            message: format!("Invalid page token: {}", token),
        })?,
        None => 0,
    };
    let page_size = page_size.max(1);
    let end = (start + page_size).min(nodes.len());
    let next_page_token = (end < nodes.len()).then(|| end.to_string());
    Ok(NodePage {
        nodes: nodes.get(start..end).map(<[Node]>::to_vec).unwrap_or_default(),
        next_page_token,
    })
}

/// In-memory `NodeStore`.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    requests: Arc<AtomicUsize>,
    mutations: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a store holding only the top folder.
    pub fn new() -> Self {
        let top = Node {
            id: TOP_ID.to_string(),
            name: "My Drive".to_string(),
            parents: Vec::new(),
            kind: NodeKind::Directory,
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: 0,
            modified: Some(Utc::now()),
            accessed: None,
            trashed: false,
            explicitly_trashed: false,
        };
        let mut nodes = HashMap::new();
        nodes.insert(
            TOP_ID.to_string(),
            StoredNode {
                node: top,
                content: Bytes::new(),
                seq: 0,
            },
        );
        Self {
            state: Arc::new(Mutex::new(MemoryState { nodes, next_seq: 1 })),
            requests: Arc::new(AtomicUsize::new(0)),
            mutations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of backend calls served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of calls that changed the store.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Number of nodes, the top included.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Current content of a node, bypassing the request counters.
    pub fn content(&self, id: &str) -> Option<Bytes> {
        let state = self.state.lock();
        state.lookup(id).ok().map(|s| s.content.clone())
    }

    fn request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }

    fn mutation(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Node> {
        self.request();
        let state = self.state.lock();
        Ok(state.lookup(id)?.node.clone())
    }

    async fn find_child(&self, parent_id: &str, name: &str) -> Result<Option<Node>> {
        self.request();
        let state = self.state.lock();
        let parent_id = state.resolve_alias(parent_id);
        let found = state
            .nodes
            .values()
            .filter(|s| {
                !s.node.trashed
                    && s.node.name == name
                    && s.node.parents.iter().any(|p| p == parent_id)
            })
            .min_by_key(|s| s.seq)
            .map(|s| s.node.clone());
        Ok(found)
    }

    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<NodePage> {
        self.request();
        let state = self.state.lock();
        let parent_id = state.resolve_alias(parent_id);
        state.lookup(parent_id)?;
        let children = state
            .children_of(parent_id)
            .into_iter()
            .map(|s| s.node.clone())
            .collect();
        paginate(children, page_token, page_size)
    }

    async fn list_trashed(&self, page_token: Option<&str>, page_size: usize) -> Result<NodePage> {
        self.request();
        let state = self.state.lock();
        let mut trashed: Vec<&StoredNode> = state
            .nodes
            .values()
            .filter(|s| s.node.explicitly_trashed)
            .collect();
        trashed.sort_by_key(|s| s.seq);
        let nodes = trashed.into_iter().map(|s| s.node.clone()).collect();
        paginate(nodes, page_token, page_size)
    }

    async fn create(&self, parent_id: &str, name: &str, kind: NodeKind) -> Result<Node> {
        self.mutation();
        let mut state = self.state.lock();
        let parent = state.lookup(parent_id)?;
        if !parent.node.is_dir() {
            return Err(DriveError::ApiError {
                code: 400,
                reason: ApiErrorReason::BadRequest,
                message: format!("Parent {} is not a folder", parent.node.id),
            });
        }
        let parent_id = parent.node.id.clone();

        let seq = state.next_seq;
        state.next_seq += 1;
        let node = Node {
            id: format!("mem{:08x}", seq),
            name: name.to_string(),
            parents: vec![parent_id],
            kind,
            mime_type: match kind {
                NodeKind::Directory => FOLDER_MIME_TYPE.to_string(),
                NodeKind::File => "application/octet-stream".to_string(),
            },
            size: 0,
            modified: Some(Utc::now()),
            accessed: None,
            trashed: false,
            explicitly_trashed: false,
        };
        state.nodes.insert(
            node.id.clone(),
            StoredNode {
                node: node.clone(),
                content: Bytes::new(),
                seq,
            },
        );
        Ok(node)
    }

    async fn patch(&self, id: &str, patch: NodePatch) -> Result<Node> {
        self.mutation();
        let mut state = self.state.lock();
        for parent in &patch.add_parents {
            if !state.lookup(parent)?.node.is_dir() {
                return Err(DriveError::ApiError {
                    code: 400,
                    reason: ApiErrorReason::BadRequest,
                    message: format!("Parent {} is not a folder", parent),
                });
            }
        }

        let id = state.lookup(id)?.node.id.clone();
        let descendants = match patch.trashed {
            Some(_) => state.descendants(&id),
            None => Vec::new(),
        };

        let stored = state.lookup_mut(&id)?;
        let node = &mut stored.node;
        if let Some(name) = patch.name {
            node.name = name;
        }
        node.parents.retain(|p| !patch.remove_parents.contains(p));
        for parent in patch.add_parents {
            if !node.parents.contains(&parent) {
                node.parents.push(parent);
            }
        }
        if let Some(trashed) = patch.trashed {
            node.trashed = trashed;
            node.explicitly_trashed = trashed;
        }
        if let Some(modified) = patch.modified {
            node.modified = Some(modified);
        }
        if let Some(accessed) = patch.accessed {
            node.accessed = Some(accessed);
        }
        let updated = node.clone();

        // Trash state propagates to descendants without marking them explicit.
        if let Some(trashed) = patch.trashed {
            for child in descendants {
                if let Some(stored) = state.nodes.get_mut(&child) {
                    stored.node.trashed = trashed;
                    stored.node.explicitly_trashed = false;
                }
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.mutation();
        let mut state = self.state.lock();
        let id = state.lookup(id)?.node.id.clone();
        if id == TOP_ID {
            return Err(DriveError::ApiError {
                code: 403,
                reason: ApiErrorReason::Forbidden,
                message: "The top folder cannot be deleted".to_string(),
            });
        }

        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            state.nodes.remove(&current);
            for stored in state.nodes.values_mut() {
                let before = stored.node.parents.len();
                stored.node.parents.retain(|p| p != &current);
                if before > 0 && stored.node.parents.is_empty() {
                    pending.push(stored.node.id.clone());
                }
            }
        }
        Ok(())
    }

    async fn write_content(&self, id: &str, data: Bytes) -> Result<Node> {
        self.mutation();
        self.state.lock().set_content(id, data)
    }

    async fn begin_upload(&self, id: &str) -> Result<Box<dyn ContentUpload>> {
        self.request();
        let id = self.state.lock().lookup(id)?.node.id.clone();
        Ok(Box::new(MemoryUpload {
            store: self.clone(),
            id,
            data: BytesMut::new(),
        }))
    }

    async fn upload_stream(
        &self,
        id: &str,
        body: BoxStream<'static, Result<Bytes>>,
    ) -> Result<Node> {
        self.mutation();
        let chunks: Vec<Bytes> = body.try_collect().await?;
        let mut content = BytesMut::new();
        for chunk in chunks {
            content.extend_from_slice(&chunk);
        }
        self.state.lock().set_content(id, content.freeze())
    }

    async fn read_content(&self, id: &str) -> Result<Bytes> {
        self.request();
        let state = self.state.lock();
        Ok(state.lookup(id)?.content.clone())
    }
}

struct MemoryUpload {
    store: MemoryStore,
    id: String,
    data: BytesMut,
}

#[async_trait]
impl ContentUpload for MemoryUpload {
    async fn append(&mut self, data: Bytes) -> Result<()> {
        self.store.request();
        self.data.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<Node> {
        self.store.mutation();
        let MemoryUpload { store, id, data } = *self;
        let mut state = store.state.lock();
        state.set_content(&id, data.freeze())
    }
}
