//! Trash: moving nodes to the trash and listing what is there.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::api::NodePatch;
use crate::drive::Drive;
use crate::error::{DriveError, Result, ResultExt};
use crate::fs::node::{Node, TrashEntry};
use crate::fs::path::{is_within, join_path, normalize_path};

const TRASH_PAGE_SIZE: usize = 100;

impl Drive {
    /// Move the node at `path` to the trash. Its parent link is kept.
    #[instrument(skip(self), level = "debug")]
    pub async fn trash_path(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(DriveError::ForbiddenRootOperation);
        }
        let node = self.resolve(&path).await?;
        self.trash_node(&path, &node).await?;
        self.cache().evict_tree(&self.root_scope().id(), &path);
        Ok(())
    }

    /// Explicitly trashed nodes under `scope`, with their original paths.
    ///
    /// Nodes that can no longer be reached from the active root are
    /// skipped. A `limit` of zero or less returns every entry. A `scope`
    /// that neither exists nor names a trashed entry fails with NotExist.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_trash(&self, scope: &str, limit: i64) -> Result<Vec<TrashEntry>> {
        let scope = normalize_path(scope);
        let want = usize::try_from(limit).ok().filter(|n| *n > 0);
        let mut parents = HashMap::new();
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .store()
                .list_trashed(page_token.as_deref(), TRASH_PAGE_SIZE)
                .await
                .context("list trash", &scope)?;

            for node in page.nodes {
                let Some(parent_path) = self.locate_parent(&node, &mut parents).await? else {
                    continue;
                };
                let path = join_path(&parent_path, &node.name);
                if !is_within(&path, &scope) {
                    continue;
                }
                entries.push(TrashEntry { node, path });
                if want.is_some_and(|n| entries.len() >= n) {
                    return Ok(entries);
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        if entries.is_empty() && !scope.is_empty() {
            self.resolve(&scope).await?;
        }
        Ok(entries)
    }

    pub(crate) async fn trash_node(&self, path: &str, node: &Node) -> Result<()> {
        let patch = NodePatch {
            trashed: Some(true),
            ..Default::default()
        };
        self.store()
            .patch(&node.id, patch)
            .await
            .context("trash", path)?;
        debug!(path, id = %node.id, "trashed");
        Ok(())
    }

    /// Fetch a parent once per walk; unreachable parents are remembered as
    /// `None`.
    pub(crate) async fn fetch_parent(
        &self,
        id: &str,
        seen: &mut HashMap<String, Option<Node>>,
    ) -> Result<Option<Node>> {
        if let Some(parent) = seen.get(id) {
            return Ok(parent.clone());
        }
        let parent = match self.store().get(id).await {
            Ok(node) => Some(node),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err).context("get", id),
        };
        seen.insert(id.to_string(), parent.clone());
        Ok(parent)
    }
}
