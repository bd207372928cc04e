//! Active root scope.

use parking_lot::RwLock;

use super::node::Node;

/// The node paths are resolved from.
///
/// Replacing the root only swaps this snapshot; the remote graph is never
/// touched.
#[derive(Debug)]
pub(crate) struct RootScope {
    current: RwLock<Node>,
}

impl RootScope {
    pub(crate) fn new(root: Node) -> Self {
        Self {
            current: RwLock::new(root),
        }
    }

    pub(crate) fn current(&self) -> Node {
        self.current.read().clone()
    }

    pub(crate) fn id(&self) -> String {
        self.current.read().id.clone()
    }

    pub(crate) fn replace(&self, root: Node) -> Node {
        std::mem::replace(&mut *self.current.write(), root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::node::test_node;
    use crate::fs::NodeKind;

    #[test]
    fn test_replace_returns_previous() {
        let scope = RootScope::new(test_node("top", "My Drive", NodeKind::Directory, &[]));
        assert_eq!(scope.id(), "top");

        let previous = scope.replace(test_node("sub", "Sub", NodeKind::Directory, &["top"]));
        assert_eq!(previous.id, "top");
        assert_eq!(scope.current().name, "Sub");
    }
}
