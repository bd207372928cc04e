//! Remote node store: the backend calls the filesystem layer needs.

pub mod client;
pub mod error;
pub mod memory;
pub mod store;

pub use client::DriveClient;
pub use error::ApiErrorReason;
pub use memory::MemoryStore;
pub use store::{ContentUpload, NodePage, NodePatch, NodeStore, TOP_ALIAS};
