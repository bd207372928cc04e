//! Drive API error reasons and the JSON error envelope.

use serde::Deserialize;

use crate::error::DriveError;

/// Drive API error reasons (the `reason` field of the error envelope)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorReason {
    /// Malformed request
    BadRequest,
    /// Invalid or expired credentials
    AuthError,
    /// Caller lacks permission
    Forbidden,
    /// Node does not exist
    NotFound,
    /// Per-user rate limit exceeded
    UserRateLimitExceeded,
    /// Project rate limit exceeded
    RateLimitExceeded,
    /// Storage quota exceeded
    StorageQuotaExceeded,
    /// Backend failure
    BackendError,
    /// Folder would exceed its child limit
    ChildLimitExceeded,
    /// Unknown reason
    Unknown,
}

impl From<&str> for ApiErrorReason {
    fn from(reason: &str) -> Self {
        match reason {
            "badRequest" | "invalid" | "required" => ApiErrorReason::BadRequest,
            "authError" | "unauthorized" => ApiErrorReason::AuthError,
            "forbidden" | "insufficientPermissions" => ApiErrorReason::Forbidden,
            "notFound" => ApiErrorReason::NotFound,
            "userRateLimitExceeded" => ApiErrorReason::UserRateLimitExceeded,
            "rateLimitExceeded" => ApiErrorReason::RateLimitExceeded,
            "storageQuotaExceeded" => ApiErrorReason::StorageQuotaExceeded,
            "backendError" | "internalError" => ApiErrorReason::BackendError,
            "teamDriveFileLimitExceeded" | "numChildrenInNonRootLimitExceeded" => {
                ApiErrorReason::ChildLimitExceeded
            }
            _ => ApiErrorReason::Unknown,
        }
    }
}

impl ApiErrorReason {
    /// Get human-readable description of the reason.
    pub fn description(&self) -> &'static str {
        match self {
            ApiErrorReason::BadRequest => "Bad request",
            ApiErrorReason::AuthError => "Invalid credentials",
            ApiErrorReason::Forbidden => "Forbidden",
            ApiErrorReason::NotFound => "File not found",
            ApiErrorReason::UserRateLimitExceeded => "User rate limit exceeded",
            ApiErrorReason::RateLimitExceeded => "Rate limit exceeded",
            ApiErrorReason::StorageQuotaExceeded => "Storage quota exceeded",
            ApiErrorReason::BackendError => "Backend error",
            ApiErrorReason::ChildLimitExceeded => "Child limit exceeded",
            ApiErrorReason::Unknown => "Unknown error",
        }
    }

    /// Whether the transport should back off and retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiErrorReason::UserRateLimitExceeded
                | ApiErrorReason::RateLimitExceeded
                | ApiErrorReason::BackendError
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

/// Decode an error response body into a `DriveError`.
///
/// Bodies that are not an error envelope fall back to the bare status.
pub(crate) fn parse_error_body(status: u16, body: &str) -> DriveError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .first()
                .map(|item| ApiErrorReason::from(item.reason.as_str()))
                .unwrap_or(if envelope.error.code == 404 {
                    ApiErrorReason::NotFound
                } else {
                    ApiErrorReason::Unknown
                });
            let message = if envelope.error.message.is_empty() {
                reason.description().to_string()
            } else {
                envelope.error.message
            };
            DriveError::ApiError {
                code: envelope.error.code,
                reason,
                message,
            }
        }
        Err(_) => DriveError::HttpError(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_conversion() {
        assert_eq!(ApiErrorReason::from("notFound"), ApiErrorReason::NotFound);
        assert_eq!(
            ApiErrorReason::from("userRateLimitExceeded"),
            ApiErrorReason::UserRateLimitExceeded
        );
        assert_eq!(
            ApiErrorReason::from("insufficientPermissions"),
            ApiErrorReason::Forbidden
        );
        assert_eq!(ApiErrorReason::from("somethingNew"), ApiErrorReason::Unknown);
    }

    #[test]
    fn test_retryable_reasons() {
        assert!(ApiErrorReason::RateLimitExceeded.is_retryable());
        assert!(ApiErrorReason::BackendError.is_retryable());
        assert!(!ApiErrorReason::NotFound.is_retryable());
        assert!(!ApiErrorReason::StorageQuotaExceeded.is_retryable());
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = r#"{"error":{"code":404,"message":"File not found: abc.","errors":[{"domain":"global","reason":"notFound","message":"File not found: abc."}]}}"#;
        match parse_error_body(404, body) {
            DriveError::ApiError {
                code,
                reason,
                message,
            } => {
                assert_eq!(code, 404);
                assert_eq!(reason, ApiErrorReason::NotFound);
                assert_eq!(message, "File not found: abc.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_garbage_body() {
        assert!(matches!(
            parse_error_body(502, "<html>bad gateway</html>"),
            DriveError::HttpError(502)
        ));
    }
}
