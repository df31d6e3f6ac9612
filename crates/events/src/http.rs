//! Shared HTTP plumbing for the REST-based channels.

use std::time::Duration;

use crate::channel::DeliveryError;

/// HTTP request timeout for a single delivery attempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the client shared by all HTTP channels (one connection pool).
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build tuned HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Pass through a 2xx response, turning anything else into
/// [`DeliveryError::HttpStatus`] with the response body for debugging.
pub async fn check_status(
    channel: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, DeliveryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DeliveryError::HttpStatus {
        channel,
        status: status.as_u16(),
        body,
    })
}

/// Read a required, non-empty environment variable.
pub(crate) fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
