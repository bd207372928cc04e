//! Filesystem view: nodes, paths, handles and the operations behind them.

pub(crate) mod cache;
pub mod handle;
pub(crate) mod node;
mod operations;
pub mod path;
pub(crate) mod root;
pub(crate) mod write_buffer;

pub use handle::{FileHandle, OpenOptions};
pub use node::{Node, NodeKind, TrashEntry, FOLDER_MIME_TYPE};
