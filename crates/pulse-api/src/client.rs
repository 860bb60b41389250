//! Backend HTTP client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{ApiError, ApiRequest, Method};

/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default total request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can answer a backend request.
///
/// One call to [`Backend::send`] is exactly one physical request. Callers
/// that need de-duplication or retries layer them on top.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Send a request and return the decoded JSON body.
    ///
    /// Empty bodies (e.g. `204 No Content`) decode to `Value::Null`.
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError>;
}

/// Connection settings for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the API, e.g. `http://localhost:8000/api`.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ApiConfig {
    /// Config with default timeouts for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Client for the dashboard backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(config.base_url));
        }

        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, base_url })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Extract a human-readable message from an error body.
    ///
    /// The backend reports errors as `{"detail": ...}` or
    /// `{"error": ..., "details": ...}`; anything else is passed through.
    fn error_message(body: &str) -> String {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => {
                if let Some(detail) = value.get("detail").and_then(Value::as_str) {
                    return detail.to_string();
                }
                match (
                    value.get("error").and_then(Value::as_str),
                    value.get("details").and_then(Value::as_str),
                ) {
                    (Some(error), Some(details)) => format!("{}: {}", error, details),
                    (Some(error), None) => error.to_string(),
                    _ => body.to_string(),
                }
            }
            Err(_) if body.is_empty() => "no response body".to_string(),
            Err(_) => body.to_string(),
        }
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, self.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        trace!(method = %request.method, path = %request.path, "sending backend request");
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = Self::error_message(&text);
            debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                message = %message,
                "backend request failed"
            );
            return Err(ApiError::Status {
                method: request.method,
                path: request.path,
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
