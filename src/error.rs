//! Error types for the gdrivefs library.

use thiserror::Error;

use crate::api::ApiErrorReason;

/// Main error type for gdrivefs operations.
#[derive(Error, Debug)]
pub enum DriveError {
    /// Path resolution failed.
    #[error("`{path}' does not exist")]
    NotExist { path: String },

    /// A directory was required but the path names a file.
    #[error("file {path} is not a directory")]
    NotADirectory { path: String },

    /// A file was required but the path names a directory.
    #[error("file {path} is a directory")]
    IsADirectory { path: String },

    /// Target of a rename is an existing directory.
    #[error("file {path} already exists")]
    AlreadyExists { path: String },

    /// Empty target path.
    #[error("path cannot be empty")]
    EmptyPath,

    /// Rename or removal of the virtual root.
    #[error("forbidden for root directory")]
    ForbiddenRootOperation,

    /// Operation has no backend equivalent.
    #[error("not supported")]
    Unsupported,

    /// HTTP request failed with status code and no error body.
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// Network request error.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Base64 decoding error.
    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    /// Local I/O error (token files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend kept rejecting the request as rate limited.
    #[error("Server busy, try again later")]
    ServerBusy,

    /// Invalid or unexpected response from server.
    #[error("Invalid response from server")]
    InvalidResponse,

    /// Drive API returned an error envelope.
    #[error("API error: {code} - {message}")]
    ApiError {
        code: u16,
        reason: ApiErrorReason,
        message: String,
    },

    /// Remote failure with the operation and path that triggered it.
    #[error("{op} {path}: {source}")]
    Remote {
        op: &'static str,
        path: String,
        #[source]
        source: Box<DriveError>,
    },

    /// Custom error message.
    #[error("{0}")]
    Custom(String),
}

impl DriveError {
    pub(crate) fn not_exist(path: impl Into<String>) -> Self {
        DriveError::NotExist { path: path.into() }
    }

    pub(crate) fn not_a_directory(path: impl Into<String>) -> Self {
        DriveError::NotADirectory { path: path.into() }
    }

    /// True when the backend reported the node as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            DriveError::NotExist { .. } => true,
            DriveError::ApiError { code, reason, .. } => {
                *code == 404 || *reason == ApiErrorReason::NotFound
            }
            DriveError::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for the path-validation variants that never reach the backend.
    pub fn is_path_error(&self) -> bool {
        matches!(
            self,
            DriveError::NotExist { .. }
                | DriveError::NotADirectory { .. }
                | DriveError::IsADirectory { .. }
                | DriveError::AlreadyExists { .. }
                | DriveError::EmptyPath
                | DriveError::ForbiddenRootOperation
                | DriveError::Unsupported
        )
    }
}

/// Result type alias for gdrivefs operations.
pub type Result<T> = std::result::Result<T, DriveError>;

/// Adds operation and path context to remote failures.
///
/// Taxonomy errors pass through untouched so callers keep matching on them.
pub(crate) trait ResultExt<T> {
    fn context(self, op: &'static str, path: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, op: &'static str, path: &str) -> Result<T> {
        self.map_err(|err| {
            if err.is_path_error() || matches!(err, DriveError::Remote { .. }) {
                err
            } else {
                DriveError::Remote {
                    op,
                    path: path.to_string(),
                    source: Box::new(err),
                }
            }
        })
    }
}
