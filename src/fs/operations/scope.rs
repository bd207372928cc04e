//! Switching the root and checking whether nodes lie under it.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::drive::Drive;
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::node::Node;
use crate::fs::path::normalize_path;

impl Drive {
    /// Resolve `path` from the backend top and make it the root.
    pub async fn set_root_directory(&self, path: &str) -> Result<Node> {
        let path = normalize_path(path);
        let top = self.store().top().await.context("get", "root")?;
        let node = self.resolve_from(&top, &path).await?;
        if !node.is_dir() {
            return Err(DriveError::not_a_directory(path));
        }
        self.adopt_root(node.clone());
        Ok(node)
    }

    /// Make the node with `id` the root without checking where it lives.
    pub async fn set_root_node(&self, id: &str) -> Result<Node> {
        let node = self.store().get(id).await.context("get", id)?;
        self.adopt_root(node.clone());
        Ok(node)
    }

    /// Whether `node` lies under the active root, and if so the
    /// root-relative path of the directory holding it.
    pub async fn is_in_root(&self, node: &Node) -> Result<(bool, String)> {
        let mut seen = HashMap::new();
        Ok(match self.locate_parent(node, &mut seen).await? {
            Some(path) => (true, path),
            None => (false, String::new()),
        })
    }

    /// Walk up from `node` until the active root is reached.
    ///
    /// A direct link to the root always wins; otherwise the first parent
    /// that still exists and is not trashed is followed.
    pub(crate) async fn locate_parent(
        &self,
        node: &Node,
        seen: &mut HashMap<String, Option<Node>>,
    ) -> Result<Option<String>> {
        let root_id = self.root_scope().id();
        let mut names: Vec<String> = Vec::new();
        let mut visited = HashSet::new();
        let mut current = node.clone();

        loop {
            if current.parents.iter().any(|p| *p == root_id) {
                names.reverse();
                return Ok(Some(names.join("/")));
            }
            if current.id == root_id || !visited.insert(current.id.clone()) {
                return Ok(None);
            }

            let mut next = None;
            for parent_id in &current.parents {
                if let Some(parent) = self.fetch_parent(parent_id, seen).await? {
                    if !parent.trashed {
                        next = Some(parent);
                        break;
                    }
                }
            }
            match next {
                Some(parent) => {
                    names.push(parent.name.clone());
                    current = parent;
                }
                None => return Ok(None),
            }
        }
    }

    fn adopt_root(&self, node: Node) {
        let previous = self.root_scope().replace(node);
        self.cache().clear();
        info!(from = %previous.id, to = %self.root_scope().id(), "root changed");
    }
}
