//! Drive configuration.

use serde::{Deserialize, Serialize};

/// Default write buffer size (4 MiB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default number of chunks the bounded queue holds before blocking.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// How a write handle accumulates bytes before they reach the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBufferKind {
    /// Upload on every write.
    ///
    /// Drive has no append, so each write re-uploads everything written so
    /// far and total upload volume grows quadratically with the write count.
    /// Meant for small files or callers that write once.
    None,
    /// One buffer, flushed synchronously when full.
    #[default]
    Simple,
    /// Two buffers; a full one uploads in the background.
    Async,
    /// Bounded queue feeding one streamed upload.
    BoundedQueue,
}

/// Which node acts as the virtual root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSelector {
    /// Path resolved from the backend top.
    Path(String),
    /// Raw node id, adopted without validation.
    Id(String),
}

/// Configuration for a [`Drive`](crate::Drive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub root: Option<RootSelector>,
    pub write_buffer: WriteBufferKind,
    pub write_buffer_size: usize,
    pub queue_depth: usize,
    pub trash_for_delete: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            root: None,
            write_buffer: WriteBufferKind::default(),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            trash_for_delete: false,
        }
    }
}

impl DriveConfig {
    /// Resolve paths from the directory at `path`.
    pub fn root_directory(mut self, path: impl Into<String>) -> Self {
        self.root = Some(RootSelector::Path(path.into()));
        self
    }

    /// Resolve paths from the node with `id`.
    pub fn root_node(mut self, id: impl Into<String>) -> Self {
        self.root = Some(RootSelector::Id(id.into()));
        self
    }

    pub fn write_buffer(mut self, kind: WriteBufferKind, size: usize) -> Self {
        self.write_buffer = kind;
        self.write_buffer_size = size;
        self
    }

    pub fn trash_for_delete(mut self, enabled: bool) -> Self {
        self.trash_for_delete = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriveConfig::default();
        assert_eq!(config.write_buffer, WriteBufferKind::Simple);
        assert_eq!(config.write_buffer_size, DEFAULT_WRITE_BUFFER_SIZE);
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert!(!config.trash_for_delete);
        assert!(config.root.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: DriveConfig = serde_json::from_str(
            r#"{"root":{"path":"Backups/host"},"write_buffer":"bounded_queue","trash_for_delete":true}"#,
        )
        .unwrap();
        assert_eq!(config.root, Some(RootSelector::Path("Backups/host".to_string())));
        assert_eq!(config.write_buffer, WriteBufferKind::BoundedQueue);
        assert_eq!(config.write_buffer_size, DEFAULT_WRITE_BUFFER_SIZE);
        assert!(config.trash_for_delete);
    }

    #[test]
    fn test_builder_methods() {
        let config = DriveConfig::default()
            .root_node("1abc")
            .write_buffer(WriteBufferKind::Async, 1024)
            .trash_for_delete(true);
        assert_eq!(config.root, Some(RootSelector::Id("1abc".to_string())));
        assert_eq!(config.write_buffer, WriteBufferKind::Async);
        assert_eq!(config.write_buffer_size, 1024);
        assert!(config.trash_for_delete);
    }
}
