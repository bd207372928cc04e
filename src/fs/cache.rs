//! Path to node cache.

use dashmap::DashMap;

use super::node::Node;
use super::path::is_within;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    root: String,
    path: String,
}

/// Resolved nodes keyed by (root id, normalized path).
///
/// Keying on the root id keeps a resolution that started under a previous
/// root from landing in the current root's namespace. Lookups clone the
/// node out so no shard lock is held across an await.
#[derive(Debug, Default)]
pub(crate) struct NodeCache {
    entries: DashMap<CacheKey, Node>,
}

impl NodeCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, root: &str, path: &str) -> Option<Node> {
        let key = CacheKey {
            root: root.to_string(),
            path: path.to_string(),
        };
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    pub(crate) fn insert(&self, root: &str, path: &str, node: Node) {
        let key = CacheKey {
            root: root.to_string(),
            path: path.to_string(),
        };
        self.entries.insert(key, node);
    }

    /// Drop the entry for `path` and everything cached below it.
    pub(crate) fn evict_tree(&self, root: &str, path: &str) {
        self.entries
            .retain(|key, _| !(key.root == root && is_within(&key.path, path)));
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
