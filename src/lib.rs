//! # gdrivefs
//!
//! Path-addressed filesystem view over Google Drive.
//!
//! Drive stores an id-addressed graph of nodes where names are not unique and
//! a node may have several parents. This crate resolves slash-separated paths
//! against that graph and exposes familiar filesystem operations on top.
//!
//! ## Features
//!
//! - **Path resolution** with a concurrent per-segment cache.
//! - **Directory operations**: `mkdir`, `mkdir_all`, `stat`, paged `readdir`,
//!   `rename` (one atomic patch), `remove` and `delete_directory`.
//! - **Root scoping**: resolve every path from a chosen folder, selected by
//!   path or by node id.
//! - **Trash**: move to trash instead of deleting, list trashed nodes with
//!   their original paths.
//! - **Write buffering**: upload on every write, through a single buffer, with
//!   background flushes, or through a bounded queue feeding one streamed
//!   upload.
//!
//! Any backend implementing [`NodeStore`] can sit underneath; [`DriveClient`]
//! talks to the Drive v3 REST API and [`MemoryStore`] keeps everything in
//! memory.
//!
//! ## Example
//!
//! ```no_run
//! use gdrivefs::{Drive, DriveConfig, Token, WriteBufferKind};
//!
//! # async fn example() -> gdrivefs::Result<()> {
//! let token = Token::load("token.json")?;
//! let config = DriveConfig::default()
//!     .root_directory("Backups/host")
//!     .write_buffer(WriteBufferKind::BoundedQueue, 8 * 1024 * 1024);
//! let drive = Drive::from_token(token, config).await?;
//!
//! let mut file = drive.create("2024/notes.txt").await?;
//! file.write(b"Hello World").await?;
//! file.close().await?;
//!
//! let mut dir = drive.open("2024").await?;
//! for node in dir.readdir(0).await? {
//!     println!("{} ({} bytes)", node.name, node.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod fs;
pub mod http;

// Re-export commonly used types
pub use api::{DriveClient, MemoryStore, NodeStore};
pub use auth::Token;
pub use config::{DriveConfig, RootSelector, WriteBufferKind};
pub use drive::Drive;
pub use error::{DriveError, Result};
pub use fs::{FileHandle, Node, NodeKind, OpenOptions, TrashEntry};
pub use http::HttpClient;
