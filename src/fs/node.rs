//! Filesystem node types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file
    File,
    /// Folder/directory
    Directory,
}

impl NodeKind {
    /// Derive the kind from a Drive MIME type.
    pub fn from_mime_type(mime_type: &str) -> Self {
        if mime_type == FOLDER_MIME_TYPE {
            NodeKind::Directory
        } else {
            NodeKind::File
        }
    }
}

/// A snapshot of one remote node.
///
/// Lookups always produce a fresh value; a `Node` is never updated in place
/// when the remote entry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Opaque remote id
    pub id: String,
    /// Node name
    pub name: String,
    /// Parent ids; Drive may record more than one
    pub parents: Vec<String>,
    /// File or directory
    pub kind: NodeKind,
    /// MIME type as reported by the backend
    pub mime_type: String,
    /// Content size in bytes (0 for directories)
    pub size: u64,
    /// Last modification time
    pub modified: Option<DateTime<Utc>>,
    /// Last access time (Drive's "viewed by me")
    pub accessed: Option<DateTime<Utc>>,
    /// Node is in the trash
    pub trashed: bool,
    /// Node was trashed directly rather than through an ancestor
    pub explicitly_trashed: bool,
}

impl Node {
    /// Check if this node is a file.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Check if this node is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// Node name, as `FileInfo::Name` would report it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Modification time, falling back to the Unix epoch.
    pub fn mod_time(&self) -> DateTime<Utc> {
        self.modified.unwrap_or(DateTime::UNIX_EPOCH)
    }
}

/// A trashed node together with the path it had before being trashed.
#[derive(Debug, Clone)]
pub struct TrashEntry {
    /// The trashed node
    pub node: Node,
    /// Root-relative path reconstructed from the node's ancestry
    pub path: String,
}

impl TrashEntry {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
pub(crate) fn test_node(id: &str, name: &str, kind: NodeKind, parents: &[&str]) -> Node {
    Node {
        id: id.to_string(),
        name: name.to_string(),
        parents: parents.iter().map(|p| p.to_string()).collect(),
        kind,
        mime_type: match kind {
            NodeKind::Directory => FOLDER_MIME_TYPE.to_string(),
            NodeKind::File => "application/octet-stream".to_string(),
        },
        size: 0,
        modified: None,
        accessed: None,
        trashed: false,
        explicitly_trashed: false,
    }
}
