//! Authenticated HTTP transport for Drive API requests.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::time::{sleep, timeout};

use crate::api::error::parse_error_body;
use crate::auth::Token;
use crate::error::{DriveError, Result};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts for a retryable request before giving up.
const MAX_ATTEMPTS: u32 = 6;

/// HTTP client carrying the caller's credentials.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    token: Token,
}

impl HttpClient {
    /// Create a new HTTP client using `token` for every request.
    pub fn new(token: Token) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    /// Wrap an already configured `reqwest::Client`.
    pub fn with_client(client: Client, token: Token) -> Self {
        Self { client, token }
    }

    /// Create a new HTTP client with a proxy.
    pub fn with_proxy(token: Token, proxy: &str) -> Result<Self> {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| DriveError::Custom(format!("Invalid proxy: {}", e)))?;

        let client = Client::builder()
            .proxy(proxy)
            .build()
            .map_err(|e| DriveError::Custom(format!("Failed to build client: {}", e)))?;

        Ok(Self { client, token })
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Start a request with the authorization header set.
    pub fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token.access_token)
    }

    /// Send a request once. Non-success statuses become errors, except the
    /// ones listed in `accept`.
    pub async fn send_once(&self, builder: RequestBuilder, accept: &[StatusCode]) -> Result<Response> {
        let response = timeout(REQUEST_TIMEOUT, builder.send())
            .await
            .map_err(|_| DriveError::Custom("HTTP request timed out".to_string()))??;

        let status = response.status();
        if status.is_success() || accept.contains(&status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(parse_error_body(status.as_u16(), &body))
    }

    /// Send a request built by `build`, retrying rate-limit and server errors
    /// with exponential backoff.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut delay_ms = 250u64;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.send_once(build(), &[]).await {
                Err(err) if is_retryable(&err) && attempts < MAX_ATTEMPTS => {
                    let jitter = rand::random::<u64>() % 100;
                    tracing::debug!(attempts, delay_ms, error = %err, "retrying drive request");
                    sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms *= 2;
                }
                Err(err) if is_retryable(&err) => {
                    tracing::warn!(attempts, error = %err, "drive request kept failing");
                    return Err(DriveError::ServerBusy);
                }
                other => return other,
            }
        }
    }
}

fn is_retryable(err: &DriveError) -> bool {
    match err {
        DriveError::ApiError { code, reason, .. } => {
            *code == 429 || *code >= 500 || reason.is_retryable()
        }
        DriveError::HttpError(code) => *code == 429 || *code >= 500,
        _ => false,
    }
}
