//! HTTP utilities for control-plane REST calls

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull the human-readable message out of an error body.
///
/// Understands `{"message": ...}` and `{"error": {"message": ...}}` shapes;
/// anything else is logged sanitized.
fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.get("message")
            .or_else(|| v.get("error").and_then(|e| e.get("message")))
            .and_then(Value::as_str)
    });

    match message {
        Some(message) => sanitize_for_log(message),
        None => sanitize_for_log(body),
    }
}

/// Failure of a single control-plane request
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("API request failed: {status} - {message}")]
    Status { status: StatusCode, message: String },

    #[error("failed to send request: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to parse response JSON: {0}")]
    Decode(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RemoteError {
    pub fn from_status(status: StatusCode, message: &str) -> Self {
        Self::Status {
            status,
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND)
    }

    /// Worth retrying: throttling, server-side hiccups, connection trouble
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => matches!(
                *status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::INTERNAL_SERVER_ERROR
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Network(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            Self::Decode(_) | Self::InvalidEndpoint(_) => false,
        }
    }
}

/// HTTP client wrapper for control-plane calls
#[derive(Clone)]
pub struct ControlPlaneHttp {
    client: Client,
}

impl ControlPlaneHttp {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, RemoteError> {
        let client = Client::builder()
            .user_agent(concat!("cloudsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Make a GET request
    pub async fn get(&self, url: &str, token: Option<&str>) -> Result<Value, RemoteError> {
        self.send(Method::GET, url, token, &[], None).await
    }

    /// Make a POST request
    pub async fn post(
        &self,
        url: &str,
        token: Option<&str>,
        headers: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        self.send(Method::POST, url, token, headers, body).await
    }

    /// Make a PUT request
    pub async fn put(
        &self,
        url: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, RemoteError> {
        self.send(Method::PUT, url, token, &[], Some(body)).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str, token: Option<&str>) -> Result<Value, RemoteError> {
        self.send(Method::DELETE, url, token, &[], None).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        headers: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, RemoteError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(RemoteError::Status {
                status,
                message: error_message(&response_body),
            });
        }

        // Handle empty response (202/204 on delete)
        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body).map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

/// Format a remote error for display
/// Security: Sanitizes error messages to avoid leaking sensitive API details
pub fn format_remote_error(error: &RemoteError) -> String {
    match error.status() {
        Some(StatusCode::FORBIDDEN) => {
            "Permission denied. Check your policies for this compartment.".to_string()
        }
        Some(StatusCode::UNAUTHORIZED) => {
            "Authentication failed. Check CLOUDSYNC_TOKEN.".to_string()
        }
        Some(StatusCode::NOT_FOUND) => "Resource not found.".to_string(),
        Some(StatusCode::TOO_MANY_REQUESTS) => {
            "Rate limit exceeded. Please try again later.".to_string()
        }
        Some(StatusCode::BAD_REQUEST) => "Invalid request. Check your parameters.".to_string(),
        Some(StatusCode::CONFLICT) => {
            "Resource conflict. The resource may be busy with another operation.".to_string()
        }
        Some(status) if status.is_server_error() => {
            "Service temporarily unavailable. Please try again.".to_string()
        }
        Some(_) => "Request failed. Check your network connection and try again.".to_string(),
        None => {
            let error_str = error.to_string();
            let sanitized: String = error_str
                .chars()
                .filter(|c| c.is_ascii_graphic() || *c == ' ')
                .take(80)
                .collect();

            if sanitized.len() < error_str.len() {
                format!("{}...", sanitized)
            } else {
                sanitized
            }
        }
    }
}
